use mock_server::{shared, AuthMode, ServerState, StubConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Runs the stub on `127.0.0.1:$PORT` (default 3000). `AUTH` selects `basic`
/// or `digest` enforcement with `USERNAME` / `PASSWORD`.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let auth = match std::env::var("AUTH").unwrap_or_default().to_ascii_lowercase().as_str() {
        "basic" => AuthMode::Basic,
        "digest" => AuthMode::Digest,
        _ => AuthMode::None,
    };
    let config = StubConfig {
        auth,
        username: std::env::var("USERNAME").unwrap_or_else(|_| "user".to_string()),
        password: std::env::var("PASSWORD").unwrap_or_else(|_| "pass".to_string()),
        ..StubConfig::default()
    };

    let mut state = ServerState::new(config);
    state.add_form(
        "sample",
        "Sample Form",
        "1",
        include_str!("../fixtures/sample.xml"),
        vec![("nombre.csv".to_string(), b"name,label\nuno,One\n".to_vec())],
    );

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, ?auth, "listening");
    mock_server::run_with_state(listener, shared(state)).await
}
