//! # mvcframe 服务端
//!
//! 基于 Tokio 的 HTTP 前端：每个连接一个任务，读取完整请求后交给 [`AppContext`] 同步处理。
//! 标准输入上提供一个简单的管理控制台（`stop`、`status`、`help`）。

use mvcframe::{
    app::AppContext,
    config::Config,
    request::{read_progress, ReadProgress, Request},
    response::Response,
};

use log::{debug, error, info};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
    sync::Notify,
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

/// 请求（标头加正文）的最大字节数
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

fn main() {
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        return;
    }

    let config = Config::from_toml("config/development.toml");
    info!("配置文件已载入");
    info!("视图目录：{}", config.views_dir());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(r) => r,
        Err(e) => {
            error!("无法创建Tokio运行时：{}", e);
            return;
        }
    };

    let app = match AppContext::development(config.clone()) {
        Ok(app) => Arc::new(app),
        Err(e) => {
            error!("应用初始化失败：{}", e);
            return;
        }
    };

    runtime.block_on(serve(config, app));
}

async fn serve(config: Config, app: Arc<AppContext>) {
    let port: u16 = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);
    let socket = SocketAddrV4::new(address, port);

    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };
    info!("端口{}绑定完成", port);

    let shutdown = Arc::new(Notify::new());
    let active_connection = Arc::new(AtomicU32::new(0));

    tokio::spawn(console(Arc::clone(&shutdown), Arc::clone(&active_connection)));

    let mut id: u128 = 0;
    loop {
        let (mut stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("接受连接失败：{}", e);
                    continue;
                }
            },
            _ = shutdown.notified() => {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }
        };
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let app = Arc::clone(&app);
        let active_connection = Arc::clone(&active_connection);
        tokio::spawn(async move {
            active_connection.fetch_add(1, Ordering::SeqCst);
            handle_connection(&mut stream, id, &app).await;
            active_connection.fetch_sub(1, Ordering::SeqCst);
        });
        id += 1;
    }
}

async fn console(shutdown: Arc<Notify>, active_connection: Arc<AtomicU32>) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器将停止接受新连接");
                shutdown.notify_one();
                break;
            }
            "help" => {
                println!("== mvcframe Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("===================");
            }
            "status" => {
                println!("== mvcframe 状态 ==");
                println!("当前活跃连接数: {}", active_connection.load(Ordering::SeqCst));
                println!("===================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}

enum Incoming {
    Request(Vec<u8>),
    TooLarge,
}

/// 读取标头，再按 `Content-Length` 读完正文
async fn read_request(stream: &mut TcpStream, id: u128) -> Option<Incoming> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                return None;
            }
        };
        if n == 0 {
            return if buffer.is_empty() {
                None
            } else {
                Some(Incoming::Request(buffer))
            };
        }
        buffer.extend_from_slice(&chunk[..n]);
        match read_progress(&buffer, MAX_REQUEST_SIZE) {
            ReadProgress::Complete => return Some(Incoming::Request(buffer)),
            ReadProgress::TooLarge => {
                error!("[ID{}]请求超过{}字节，放弃读取", id, MAX_REQUEST_SIZE);
                return Some(Incoming::TooLarge);
            }
            ReadProgress::Incomplete => {}
        }
    }
}

async fn handle_connection(stream: &mut TcpStream, id: u128, app: &AppContext) {
    let buffer = match read_request(stream, id).await {
        Some(Incoming::Request(b)) => b,
        Some(Incoming::TooLarge) => {
            let _ = stream.write_all(&Response::response_413().as_bytes()).await;
            return;
        }
        None => return,
    };
    debug!("[ID{}]HTTP请求接收完毕", id);

    let start_time = Instant::now();

    let response = match Request::try_from(&buffer, id) {
        Ok(request) => {
            let response = app.handle(&request, id);
            info!(
                "[ID{}]{}, {}, {}, {}, {}, {}ms",
                id,
                request.path(),
                request.method(),
                response.status_code(),
                response.information(),
                request.user_agent(),
                start_time.elapsed().as_millis()
            );
            response
        }
        Err(e) => {
            error!("[ID{}]解析HTTP请求失败: {}", id, e);
            Response::response_400()
        }
    };

    let response_bytes = response.as_bytes();
    debug!("[ID{}]发送响应，长度: {}", id, response_bytes.len());
    if let Err(e) = stream.write_all(&response_bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}
