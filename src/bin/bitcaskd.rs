//! A minimal line-protocol front-end over [`bitcask::Engine`], mirroring
//! `original_source/cmd/server` from the project this crate's storage engine
//! is modeled on. This binary is a caller of the engine, not part of its
//! contract: argument parsing, connection handling, and command dispatch
//! all live here, outside the library.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

use bitcask::{Engine, Options};

#[derive(Parser, Debug)]
#[command(name = "bitcaskd", about = "A tiny line-protocol server over a bitcask database")]
struct Args {
    /// Directory holding the database's log files.
    #[arg(long, default_value = "data")]
    dir: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9736")]
    addr: String,

    /// Optional TOML config file layered under CLI flags and env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Size threshold, in bytes, at which the active log file rotates.
    #[arg(long)]
    max_file_size: Option<u32>,

    /// Fsync every write before it returns.
    #[arg(long)]
    sync_on_put: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )
    .expect("failed to initialize logging");

    if let Err(err) = run(args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> bitcask::Result<()> {
    let mut options = Options::load(args.config.as_deref())?;
    if let Some(max_file_size) = args.max_file_size {
        options.max_file_size = max_file_size;
    }
    if args.sync_on_put {
        options.sync_on_put = true;
    }

    let engine = Arc::new(Engine::open(&args.dir, options)?);
    log::info!("bitcaskd listening on {} (dir={})", args.addr, args.dir.display());

    let listener = TcpListener::bind(&args.addr)?;
    for stream in listener.incoming() {
        let stream = stream?;
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            if let Err(err) = handle_connection(stream, engine) {
                log::warn!("connection error: {err}");
            }
        });
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    let peer = stream.peer_addr().ok();
    log::debug!("accepted connection from {peer:?}");
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        let reply = dispatch(&engine, &line);
        writer.write_all(reply.as_bytes())?;
        writer.write_all(b"\r\n")?;
    }
    log::debug!("closed connection from {peer:?}");
    Ok(())
}

/// Parses and executes one command line, returning the reply to write back.
/// `GET` on an absent key replies `$-1` (redis-style nil), distinguishing
/// "not present" from "present with an empty value".
fn dispatch(engine: &Engine, line: &str) -> String {
    let mut parts = line.splitn(3, ' ');
    let Some(cmd) = parts.next() else {
        return "-ERR empty command".to_string();
    };

    match cmd.to_ascii_uppercase().as_str() {
        "PING" => match parts.next() {
            Some(msg) => format!("+{msg}"),
            None => "+PONG".to_string(),
        },
        "GET" => {
            let Some(key) = parts.next() else {
                return "-ERR wrong number of arguments for 'get' command".to_string();
            };
            match engine.get(key.as_bytes()) {
                Ok(Some(value)) => format!("${}", String::from_utf8_lossy(&value)),
                Ok(None) => "$-1".to_string(),
                Err(err) => format!("-ERR {err}"),
            }
        }
        "SET" => {
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                return "-ERR wrong number of arguments for 'set' command".to_string();
            };
            match engine.put(key.as_bytes(), value.as_bytes()) {
                Ok(()) => "+OK".to_string(),
                Err(err) => format!("-ERR {err}"),
            }
        }
        "DEL" => {
            let Some(key) = parts.next() else {
                return "-ERR wrong number of arguments for 'del' command".to_string();
            };
            match engine.delete(key.as_bytes()) {
                Ok(()) => "+OK".to_string(),
                Err(err) => format!("-ERR {err}"),
            }
        }
        other => format!("-ERR unknown command '{other}'"),
    }
}
