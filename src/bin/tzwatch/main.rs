//! `tzwatch` serves `GET /time`: the current instant and offset of the time
//! zone named by the `X-Timezone` header, and the next offset transition
//! within the configured horizon, as a JSON array.

mod config;
mod handler;

use clap::Parser;
use config::Config;
use handler::State;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use log::{info, warn};
use simple_logger::SimpleLogger;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::parse();
    SimpleLogger::new()
        .with_level(config.log_level)
        .with_utc_timestamps()
        .init()?;

    let state = Arc::new(State::new(
        config.zones(),
        config.clock(),
        config.horizon(),
    ));
    let listener = TcpListener::bind(config.listen).await?;
    info!(
        "listening on {}, horizon {}s, tz database {}",
        listener.local_addr()?,
        config.horizon_secs,
        config.tzdir.display()
    );

    tokio::select! {
        result = serve(listener, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

async fn serve(listener: TcpListener, state: Arc<State>) -> Result<(), BoxError> {
    loop {
        let (tcp_stream, remote_addr) = listener.accept().await?;
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |request| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(state.handle(&request)) }
            });
            let http_server = Builder::new(TokioExecutor::new());
            if let Err(err) = http_server
                .serve_connection(TokioIo::new(tcp_stream), service)
                .await
            {
                warn!("connection from {} failed: {}", remote_addr, err);
            }
        });
    }
}
