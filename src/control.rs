//! Control interface for runtime threshold tuning
//!
//! Line-oriented TCP protocol, one command per line:
//!
//! ```text
//! get <param>            -> ok <value>
//! set <param> <value>    -> ok
//! list                   -> ok <name>=<value> ...
//! ```
//!
//! Writes land in the shared threshold store; the decoder picks them
//! up on its next edge.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::pulse::thresholds::{Thresholds, PARAM_NAMES};

/// Accept control connections forever.
pub async fn serve(listener: TcpListener, thresholds: Arc<Thresholds>) -> Result<()> {
    info!(
        "Control interface listening on {}",
        listener.local_addr()?
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Control connection from {}", peer);
        let thresholds = thresholds.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, thresholds).await {
                debug!("Control connection error: {}", e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, thresholds: Arc<Thresholds>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let reply = execute(&line, &thresholds);
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    Ok(())
}

enum Command<'a> {
    Get(&'a str),
    Set(&'a str, u64),
    List,
}

fn parse_command(line: &str) -> Result<Command<'_>, &'static str> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("get") => {
            let name = tokens.next().ok_or("usage: get <param>")?;
            if tokens.next().is_some() {
                return Err("usage: get <param>");
            }
            Ok(Command::Get(name))
        }
        Some("set") => {
            let name = tokens.next().ok_or("usage: set <param> <value>")?;
            let value = tokens
                .next()
                .ok_or("usage: set <param> <value>")?
                .parse::<u64>()
                .map_err(|_| "value must be an unsigned integer")?;
            if tokens.next().is_some() {
                return Err("usage: set <param> <value>");
            }
            Ok(Command::Set(name, value))
        }
        Some("list") => Ok(Command::List),
        Some(_) => Err("unknown command"),
        None => Err("empty command"),
    }
}

fn execute(line: &str, thresholds: &Thresholds) -> String {
    match parse_command(line) {
        Ok(Command::Get(name)) => match thresholds.get(name) {
            Some(value) => format!("ok {}", value),
            None => "err unknown parameter".to_string(),
        },
        Ok(Command::Set(name, value)) => {
            if thresholds.set(name, value) {
                "ok".to_string()
            } else {
                "err unknown parameter".to_string()
            }
        }
        Ok(Command::List) => {
            let pairs: Vec<String> = PARAM_NAMES
                .iter()
                .filter_map(|&name| thresholds.get(name).map(|v| format!("{}={}", name, v)))
                .collect();
            format!("ok {}", pairs.join(" "))
        }
        Err(reason) => format!("err {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_roundtrip() {
        let thresholds = Thresholds::default();
        assert_eq!(execute("get pulse_min_len", &thresholds), "ok 500");
        assert_eq!(execute("set pulse_min_len 250", &thresholds), "ok");
        assert_eq!(execute("get pulse_min_len", &thresholds), "ok 250");
        assert_eq!(thresholds.snapshot().pulse_min_len, 250);
    }

    #[test]
    fn test_unknown_parameter() {
        let thresholds = Thresholds::default();
        assert_eq!(execute("get bogus", &thresholds), "err unknown parameter");
        assert_eq!(
            execute("set bogus 1", &thresholds),
            "err unknown parameter"
        );
    }

    #[test]
    fn test_malformed_commands() {
        let thresholds = Thresholds::default();
        assert_eq!(execute("", &thresholds), "err empty command");
        assert_eq!(execute("frobnicate", &thresholds), "err unknown command");
        assert_eq!(execute("get", &thresholds), "err usage: get <param>");
        assert_eq!(
            execute("set pulse_min_len", &thresholds),
            "err usage: set <param> <value>"
        );
        assert_eq!(
            execute("set pulse_min_len nan", &thresholds),
            "err value must be an unsigned integer"
        );
        assert_eq!(
            execute("set pulse_min_len 1 2", &thresholds),
            "err usage: set <param> <value>"
        );
    }

    #[test]
    fn test_list_shows_all_parameters() {
        let thresholds = Thresholds::default();
        let reply = execute("list", &thresholds);
        assert!(reply.starts_with("ok "));
        for name in PARAM_NAMES {
            assert!(reply.contains(name), "{} missing from list", name);
        }
    }
}
