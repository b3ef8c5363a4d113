//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use switchyard::config::AppConfig;
use switchyard::http::{HttpServer, Request};
use switchyard::{App, Dispatched, Router, Shutdown};

/// Build an app, panicking on registration errors.
pub fn app(router: Router) -> App {
    App::new(router).expect("router should be valid")
}

/// Dispatch a bodiless request straight through the app.
#[allow(dead_code)]
pub async fn dispatch(app: &App, method: &str, url: &str) -> Dispatched {
    let method = method.parse().expect("valid method");
    app.dispatch(Request::new(method, url)).await
}

/// A running server bound to an ephemeral loopback port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    shutdown: Shutdown,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start(app: App) -> Self {
        Self::start_with(AppConfig::default(), app).await
    }

    pub async fn start_with(config: AppConfig, app: App) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let receiver = shutdown.subscribe();
        let server = HttpServer::new(config, Arc::new(app));

        tokio::spawn(async move {
            let _ = server.run(listener, receiver).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        Self {
            addr,
            client,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}
