//! Line console on stdin: the application side of the pool.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::transport::SharedPool;

const HELP: &str = "commands: set <key> <value> | get <key> | remove <key> | keys | peers | quit";

pub async fn run_console(pool: SharedPool) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("set") => {
                let Some(key) = parts.next() else {
                    println!("usage: set <key> <value>");
                    continue;
                };
                let value = parts.collect::<Vec<_>>().join(" ");
                pool.lock().await.set(key, value.into_bytes());
            }
            Some("get") => {
                let Some(key) = parts.next() else {
                    println!("usage: get <key>");
                    continue;
                };
                // Completion may fire now (local hit / unknown) or later,
                // from the owner's Response.
                let echo = key.to_string();
                pool.lock().await.get(key, move |value| match value {
                    Some(v) => println!("{} = {}", echo, String::from_utf8_lossy(&v)),
                    None => println!("{}: (absent)", echo),
                });
            }
            Some("remove") => {
                let Some(key) = parts.next() else {
                    println!("usage: remove <key>");
                    continue;
                };
                pool.lock().await.remove(key);
            }
            Some("keys") => {
                let pool = pool.lock().await;
                for key in pool.local_keys() {
                    println!("{} (local)", key);
                }
                for (key, owner) in pool.remote_keys() {
                    println!("{} @ {}", key, owner);
                }
            }
            Some("peers") => {
                use tidepool_core::Transport;
                let pool = pool.lock().await;
                for peer in pool.transport().connected_peers() {
                    println!("{}", peer);
                }
            }
            Some("quit") | Some("exit") => break,
            Some(_) => println!("{}", HELP),
            None => {}
        }
    }
    Ok(())
}
