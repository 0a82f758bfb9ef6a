#![allow(dead_code)]

use regdiff::config::DiffConfig;
use regdiff::domain::{RequestSpec, TestCase};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct Reply {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            headers: Vec::new(),
            delay: None,
        }
    }

    /// Holds the response back for `delay` after the request was read.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }
}

type Handler = dyn Fn(&str, usize) -> Reply + Send + Sync;

/// Minimal HTTP/1.1 server. The handler receives the request path and how
/// many times that path was hit before.
pub struct ScriptedServer {
    pub base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl ScriptedServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let server_hits = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let hits = server_hits.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let Ok(read) = socket.read(&mut chunk).await else {
                            return;
                        };
                        if read == 0 {
                            return;
                        }
                        request.extend_from_slice(&chunk[..read]);
                        if request.windows(4).any(|window| window == b"\r\n\r\n") {
                            break;
                        }
                    }

                    let head = String::from_utf8_lossy(&request);
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let index = {
                        let mut hits = hits.lock().expect("hits lock");
                        let count = hits.entry(path.clone()).or_insert(0);
                        let index = *count;
                        *count += 1;
                        index
                    };

                    let reply = handler(&path, index);
                    if let Some(delay) = reply.delay {
                        tokio::time::sleep(delay).await;
                    }
                    let mut response = format!(
                        "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                        reply.status,
                        reply.body.len()
                    );
                    for (name, value) in &reply.headers {
                        response.push_str(&format!("{name}: {value}\r\n"));
                    }
                    response.push_str("\r\n");
                    response.push_str(&reply.body);

                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base: format!("http://{addr}"),
            hits,
        }
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .expect("hits lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

pub fn test_config(before: &ScriptedServer, after: &ScriptedServer) -> DiffConfig {
    let mut config = DiffConfig::new(before.base.clone(), after.base.clone());
    config.threads = 4;
    config.retry_wait_min = Duration::from_millis(1);
    config.retry_wait_max = Duration::from_millis(5);
    config.request_timeout = Duration::from_secs(5);
    config.system_proxy = false;
    config
}

pub fn case(row: u32, before: &ScriptedServer, after: &ScriptedServer, path: &str) -> TestCase {
    TestCase {
        row,
        before: RequestSpec {
            method: "GET".to_string(),
            path: format!("{}{path}", before.base),
            headers: HashMap::new(),
        },
        after: RequestSpec {
            method: "GET".to_string(),
            path: format!("{}{path}", after.base),
            headers: HashMap::new(),
        },
    }
}
