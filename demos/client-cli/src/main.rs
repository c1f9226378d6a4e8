//! `purcrdr-client-cli`: an illustrative example client with commands
//! `help`, `exit`, `reset`, `write`, `load`, `update`, `append`,
//! `prepend`, `insertBefore`, `insertAfter`, `clear`, `erase`, `show`.
//! Not part of the protocol core; a thin REPL over [`purcrdr_client::Connection`]
//! that exercises the handshake, chunked write, and element-mutation paths
//! by hand.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use purcrdr_client::Connection;
use purcrdr_protocol::{DataType, ElementLocator, ElementType, Message, Target};

/// Bytes per `writeBegin`/`writeMore` chunk.
const WRITE_CHUNK_SIZE: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "purcrdr-client-cli")]
#[command(about = "Illustrative PurCRDR client REPL")]
struct Args {
    /// Unix-socket path the server is listening on.
    #[arg(long, default_value = purcrdr_protocol::DEF_US_PATH)]
    socket: PathBuf,

    #[arg(long, default_value = "cn.fmsoft.test")]
    app: String,

    #[arg(long, default_value = "t1")]
    runner: String,
}

struct Session {
    conn: Connection,
    session_handle: Option<u64>,
    window: Option<u64>,
    dom: Option<u64>,
    pending_write: Vec<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();
    let args = Args::parse();

    let conn = Connection::connect_unix(&args.socket, &args.app, &args.runner)
        .await
        .context("connecting to server")?;
    let mut session = Session { conn, session_handle: None, window: None, dom: None, pending_write: Vec::new() };

    start_session(&mut session, &args.app, &args.runner).await?;

    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = words.first() else {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        };
        let rest = &words[1..];
        match run_command(&mut session, cmd, rest).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => eprintln!("error: {e}"),
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    session.conn.disconnect().await.ok();
    Ok(())
}

async fn start_session(session: &mut Session, app: &str, runner: &str) -> Result<()> {
    let body = serde_json::json!({
        "protocolName": purcrdr_protocol::PROTOCOL_NAME,
        "protocolVersion": purcrdr_protocol::PROTOCOL_VERSION,
        "hostName": "localhost",
        "appName": app,
        "runnerName": runner,
    });
    let req = Message::new_request(
        Target::Workspace,
        0,
        "startSession",
        None,
        None,
        None,
        DataType::Ejson,
        serde_json::to_vec(&body)?,
    );
    let resp = session.conn.send_request_and_wait(&req, Connection::default_timeout()).await?;
    if resp.ret_code != 200 {
        return Err(anyhow!("startSession failed with retCode {}", resp.ret_code));
    }
    session.session_handle = Some(resp.result_value);
    println!("session established: handle={:x}", resp.result_value);
    Ok(())
}

/// Returns `Ok(true)` when the REPL should exit.
async fn run_command(session: &mut Session, cmd: &str, args: &[&str]) -> Result<bool> {
    match cmd {
        "help" => {
            print_help();
            Ok(false)
        }
        "exit" => Ok(true),
        "reset" => {
            session.window = None;
            session.dom = None;
            session.pending_write.clear();
            println!("local state reset");
            Ok(false)
        }
        "load" => {
            ensure_window(session).await?;
            let path = args.first().ok_or_else(|| anyhow!("usage: load <path>"))?;
            let data = std::fs::read(path).with_context(|| format!("reading {path}"))?;
            let window = session.window.expect("ensured above");
            let req = Message::new_request(
                Target::PlainWindow,
                window,
                "load",
                None,
                None,
                None,
                DataType::Text,
                data,
            );
            let resp = session.conn.send_request_and_wait(&req, Connection::default_timeout()).await?;
            if resp.ret_code != 200 {
                return Err(anyhow!("load failed with retCode {}", resp.ret_code));
            }
            session.dom = Some(resp.result_value);
            println!("loaded: dom handle={:x}", resp.result_value);
            Ok(false)
        }
        "write" => {
            ensure_window(session).await?;
            let path = args.first().ok_or_else(|| anyhow!("usage: write <path>"))?;
            let data = std::fs::read(path).with_context(|| format!("reading {path}"))?;
            chunked_write(session, &data).await?;
            Ok(false)
        }
        "update" => {
            let [handle, property, value] = args else {
                return Err(anyhow!("usage: update <handle> <property> <value>"));
            };
            mutate(session, "update", handle, Some(*property), value.as_bytes()).await
        }
        "append" | "prepend" | "insertBefore" | "insertAfter" => {
            let [handle, markup] = args else {
                return Err(anyhow!("usage: {cmd} <handle> <markup>"));
            };
            mutate(session, cmd, handle, None, markup.as_bytes()).await
        }
        "clear" | "erase" => {
            let [handle] = args else {
                return Err(anyhow!("usage: {cmd} <handle>"));
            };
            mutate(session, cmd, handle, None, b"").await
        }
        "show" => {
            println!(
                "session={:?} window={:?} dom={:?} last_ret_code={:?}",
                session.session_handle,
                session.window,
                session.dom,
                session.conn.last_ret_code().await
            );
            Ok(false)
        }
        other => {
            eprintln!("unknown command {other:?}; try 'help'");
            Ok(false)
        }
    }
}

async fn ensure_window(session: &mut Session) -> Result<()> {
    if session.window.is_some() {
        return Ok(());
    }
    let body = serde_json::json!({ "name": "the-plain-window-0", "title": "The Plain Window No. 0" });
    let req = Message::new_request(
        Target::Workspace,
        0,
        "createPlainWindow",
        None,
        None,
        None,
        DataType::Ejson,
        serde_json::to_vec(&body)?,
    );
    let resp = session.conn.send_request_and_wait(&req, Connection::default_timeout()).await?;
    if resp.ret_code != 200 {
        return Err(anyhow!("createPlainWindow failed with retCode {}", resp.ret_code));
    }
    session.window = Some(resp.result_value);
    println!("window created: handle={:x}", resp.result_value);
    Ok(())
}

/// Drive `writeBegin` + N `writeMore` + `writeEnd`, chunked at
/// [`WRITE_CHUNK_SIZE`] bytes.
async fn chunked_write(session: &mut Session, data: &[u8]) -> Result<()> {
    let window = session.window.expect("ensure_window called by caller");
    let mut chunks = data.chunks(WRITE_CHUNK_SIZE);
    let first = chunks.next().unwrap_or(&[]);

    let req = Message::new_request(Target::PlainWindow, window, "writeBegin", None, None, None, DataType::Text, first.to_vec());
    let resp = session.conn.send_request_and_wait(&req, Connection::default_timeout()).await?;
    if resp.ret_code != 202 {
        return Err(anyhow!("writeBegin failed with retCode {}", resp.ret_code));
    }

    for chunk in chunks {
        let req = Message::new_request(Target::PlainWindow, window, "writeMore", None, None, None, DataType::Text, chunk.to_vec());
        let resp = session.conn.send_request_and_wait(&req, Connection::default_timeout()).await?;
        if resp.ret_code != 202 {
            return Err(anyhow!("writeMore failed with retCode {}", resp.ret_code));
        }
    }

    let req = Message::new_request(Target::PlainWindow, window, "writeEnd", None, None, None, DataType::Text, vec![]);
    let resp = session.conn.send_request_and_wait(&req, Connection::default_timeout()).await?;
    if resp.ret_code != 200 {
        return Err(anyhow!("writeEnd failed with retCode {}", resp.ret_code));
    }
    session.dom = Some(resp.result_value);
    println!("write complete: dom handle={:x}", resp.result_value);
    Ok(())
}

async fn mutate(
    session: &mut Session,
    operation: &str,
    handle: &str,
    property: Option<&str>,
    data: &[u8],
) -> Result<bool> {
    let dom = session.dom.ok_or_else(|| anyhow!("no document loaded; run 'load' or 'write' first"))?;
    let element = ElementLocator { element_type: ElementType::Handle, element: handle.to_string() };
    let req = Message::new_request(
        Target::Dom,
        dom,
        operation,
        Some(element),
        property.map(String::from),
        None,
        DataType::Text,
        data.to_vec(),
    );
    let resp = session.conn.send_request_and_wait(&req, Connection::default_timeout()).await?;
    if resp.ret_code != 200 {
        return Err(anyhow!("{operation} failed with retCode {}", resp.ret_code));
    }
    println!("{operation} ok");
    Ok(false)
}

fn print_help() {
    println!(
        "commands: help, exit, reset, write <path>, load <path>, update <handle> <property> <value>,\n\
         append <handle> <markup>, prepend <handle> <markup>, insertBefore <handle> <markup>,\n\
         insertAfter <handle> <markup>, clear <handle>, erase <handle>, show"
    );
}
