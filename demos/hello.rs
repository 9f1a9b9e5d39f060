//! Minimal rkoa application.
//!
//! ```text
//! RUST_LOG=debug cargo run --example hello
//! curl -i http://127.0.0.1:3000/
//! curl -i http://127.0.0.1:3000/?name=rkoa
//! curl -i http://127.0.0.1:3000/stream
//! curl -i http://127.0.0.1:3000/boom
//! ```

use bytes::Bytes;
use futures::stream;
use rkoa::{Application, Body, LoggerMiddleware, StatusCode, from_fn};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Greeting {
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut app = Application::new();
    app.template_mut().default_header("X-Powered-By", "rkoa");

    app.with(LoggerMiddleware);
    app.with(from_fn(|ctx, next| {
        Box::pin(async move {
            let path = ctx.path().to_owned();
            match path.as_str() {
                "/" => {
                    let name = ctx.request().query_param("name").unwrap_or("world").to_owned();
                    ctx.set_json(Greeting {
                        message: format!("hello, {name}"),
                    });
                }
                "/stream" => {
                    let parts = ["one\n", "two\n", "three\n"]
                        .map(|s| Ok::<_, std::io::Error>(Bytes::from_static(s.as_bytes())));
                    ctx.set_body(Body::stream(stream::iter(parts)));
                }
                "/boom" => {
                    return Err(ctx.throw(StatusCode::UNPROCESSABLE_ENTITY, "nothing to see here"));
                }
                _ => {}
            }
            next.run(ctx).await
        })
    }));

    app.listen("127.0.0.1:3000").await?;
    Ok(())
}
