//! SC10 against a simulated controller on an in-memory serial link.

use parking_lot::Mutex;
use pzp_core::{Piece, PuzzleContext};
use pzp_driver_thorlabs::Sc10;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Echoes every command, answers `ens?` with the state, toggles on `ens`.
async fn controller(stream: DuplexStream, open: Arc<Mutex<bool>>, log: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut read = BufReader::new(read);
    loop {
        let mut buf = Vec::new();
        match read.read_until(b'\r', &mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = String::from_utf8_lossy(&buf).trim_end().to_string();
        log.lock().push(command.clone());
        let mut reply = buf.clone();
        match command.as_str() {
            "ens?" => {
                let state = if *open.lock() { b"1\r" } else { b"0\r" };
                reply.extend_from_slice(state);
            }
            "ens" => {
                let mut open = open.lock();
                *open = !*open;
            }
            _ => reply.extend_from_slice(b"CMD_NOT_DEFINED\r"),
        }
        if write.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn attached(initially_open: bool) -> (Sc10, Arc<Mutex<bool>>, Arc<Mutex<Vec<String>>>) {
    let (host, device) = tokio::io::duplex(256);
    let open = Arc::new(Mutex::new(initially_open));
    let log = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(controller(device, open.clone(), log.clone()));
    let shutter = Sc10::new(PuzzleContext::new(false));
    shutter.serial().attach(Box::new(host)).await;
    (shutter, open, log)
}

#[tokio::test]
async fn test_open_toggles_only_when_needed() {
    let (shutter, open, log) = attached(false).await;

    assert!(shutter.open().set(true).await.unwrap());
    assert!(*open.lock());
    assert_eq!(*log.lock(), vec!["ens?", "ens"]);

    assert!(shutter.open().set(true).await.unwrap());
    assert_eq!(*log.lock(), vec!["ens?", "ens", "ens?"]);
}

#[tokio::test]
async fn test_reads_state_from_controller() {
    let (shutter, open, _log) = attached(true).await;
    assert!(shutter.open().get_value().await.unwrap());
    *open.lock() = false;
    assert!(!shutter.open().get_value().await.unwrap());
}

#[tokio::test]
async fn test_close_shutter_action_toggles() {
    let (shutter, open, _log) = attached(true).await;
    shutter.open().get_value().await.unwrap();
    let result = shutter.actions().run("Close shutter", Value::Null).await.unwrap();
    assert_eq!(result, Value::Bool(false));
    assert!(!*open.lock());
}

#[tokio::test]
async fn test_garbled_reply_is_a_protocol_error() {
    let (host, mut device) = tokio::io::duplex(64);
    let shutter = Sc10::new(PuzzleContext::new(false));
    shutter.serial().attach(Box::new(host)).await;
    device.write_all(b"ens?\rX\r").await.unwrap();
    let err = shutter.open().get_value().await.unwrap_err();
    assert!(err.to_string().contains("SC10"), "{err}");
}

#[tokio::test]
async fn test_disconnected_shutter_reports_device() {
    let shutter = Sc10::new(PuzzleContext::new(false));
    let err = shutter.open().set(true).await.unwrap_err();
    assert_eq!(err.to_string(), "Shutter not connected");
    shutter.handle_close().await.unwrap();
}
