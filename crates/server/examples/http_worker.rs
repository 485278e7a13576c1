//! Answers requests from a pool of worker threads.
//!
//! The reactor thread only parses requests. Each one is handed, together
//! with its responder, to a worker over a channel; the worker takes its
//! time and replies, which wakes the reactor to write the response.
//! Pipelined requests still get their responses in order.

use http::StatusCode;
use micro_server::http::{HttpProtocol, Request, Responder, text_response};
use micro_server::{LogConfig, Server, ServerConfig};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const WORKERS: usize = 4;

type Job = (String, Responder);

fn worker(id: usize, jobs: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(_poisoned) => return,
        };
        let Ok((path, responder)) = job else { return };

        thread::sleep(Duration::from_millis(50));
        let conn_id = responder.conn_id();
        let body = format!("worker {id} answered {path}\n");
        if let Err(e) = responder.send(text_response(StatusCode::OK, body)) {
            warn!(%conn_id, cause = %e, "connection went away");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    LogConfig::default().install_global()?;

    let (tx, rx) = mpsc::channel::<Job>();
    let rx = Arc::new(Mutex::new(rx));
    for id in 0..WORKERS {
        let rx = Arc::clone(&rx);
        thread::spawn(move || worker(id, rx));
    }
    info!(workers = WORKERS, "worker pool started");

    let protocol = HttpProtocol::builder()
        .handler_fn(move |request: Request, responder: Responder| {
            // a failed send drops the responder, which answers 500
            tx.send((request.uri().path().to_owned(), responder)).map_err(|e| e.to_string())?;
            Ok(())
        })
        .build()?;
    let config = ServerConfig::builder().address(([127, 0, 0, 1], 8080)).build()?;
    Server::builder().config(config).protocol(protocol).build()?.run()?;
    Ok(())
}
