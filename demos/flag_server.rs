//! Serves a streamed page whose chunks all read the same feature flags.
//!
//! ```text
//! RUST_LOG=flagscope=debug cargo run --example flag_server
//! curl -N http://127.0.0.1:8080/
//! curl -N -H 'bypass: 1' http://127.0.0.1:8080/
//! ```

use std::{sync::Arc, time::Duration};

use flagscope::{
    Body, Response, Server, StatusCode,
    flags::{FlagId, Flags, FlagsMiddleware, MemoryBackend},
    memoizer::{Memoizer, MemoizerOptions},
    middleware::{LoggerMiddleware, Pipeline},
};
use tracing_subscriber::EnvFilter;

const FLAGS: &str = r#"{
    "search": true,
    "new_checkout": false,
    "banner": {"variant": "autumn"}
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let backend = Arc::new(MemoryBackend::from_json(FLAGS)?.with_batching(true));

    let options = MemoizerOptions::new()
        .preload(["search", "new_checkout"])
        .skip_when(|req| req.headers().get("bypass") == Some("1"));

    let pipeline = Pipeline::new()
        .layer(LoggerMiddleware)
        .layer(FlagsMiddleware::new(backend.clone()))
        .layer(Memoizer::new(options))
        .endpoint(|ctx| async move {
            let Some(flags) = ctx.extensions().get::<Flags>().cloned() else {
                return Response::new(StatusCode::InternalServerError);
            };
            let (tx, body) = Body::channel(4);
            tokio::spawn(async move {
                for section in ["header", "results", "footer"] {
                    let line = render(&flags, section).await;
                    if tx.send(line).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            });
            Response::new(StatusCode::Ok)
                .header("Content-Type", "text/plain; charset=utf-8")
                .with_body(body)
        });

    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!(
        address = %server.local_addr(),
        flags = backend.len(),
        "flag demo ready"
    );
    server.serve(pipeline).await?;
    Ok(())
}

async fn render(flags: &Flags, section: &str) -> String {
    let mut line = format!("[{section}]");
    for name in ["search", "new_checkout", "banner"] {
        let value = match flags.evaluate(&FlagId::from(name)).await {
            Ok(value) => value.to_string(),
            Err(e) => format!("error({e})"),
        };
        line.push_str(&format!(" {name}={value}"));
    }
    line.push_str(&format!(" memoizing={}\n", flags.is_memoizing()));
    line
}
