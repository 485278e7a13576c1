//! Plain HTTP on port 8080.
//!
//! `GET /` answers with a fixed body, `POST /echo` returns the request body
//! and `GET /stream` streams a chunked response through the responder.

use http::{Method, StatusCode};
use micro_server::http::{HttpProtocol, Request, Responder, empty_response, text_response};
use micro_server::{HandlerError, LogConfig, Server, ServerConfig};
use micro_http::protocol::ResponseHead;

fn handle(request: Request, mut responder: Responder) -> Result<(), HandlerError> {
    match (request.method(), request.uri().path()) {
        (&Method::GET, "/") => responder.send(text_response(StatusCode::OK, "hello world\n"))?,
        (&Method::POST, "/echo") => responder.send(text_response(StatusCode::OK, request.body().clone()))?,
        (&Method::GET, "/stream") => {
            responder.start(ResponseHead::new(()))?;
            for i in 0..5 {
                responder.write(format!("line {i}\n"))?;
            }
            responder.finish()?;
        }
        _ => responder.send(empty_response(StatusCode::NOT_FOUND))?,
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    LogConfig::default().install_global()?;

    let protocol = HttpProtocol::builder().handler_fn(handle).build()?;
    let config = ServerConfig::builder().address(([127, 0, 0, 1], 8080)).build()?;
    Server::builder().config(config).protocol(protocol).build()?.run()?;
    Ok(())
}
