//! Listen-and-dispatch: accept threads, worker threads, slot freelists.
//!
//! Each worker is an OS thread running a single-threaded async runtime;
//! connections are pinned to their worker for life and interleave
//! cooperatively there. One accept thread per bound address family blocks
//! in `accept(2)`, scores the workers by free-slot count, rents a slot
//! from the winner, and pushes the socket onto that worker's intake
//! queue. When every worker is full the socket is closed immediately.

use crate::{
    config::{ServerConfig, Shared, WaitStrategy},
    http::client::Client,
    server::connection,
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream},
    sync::{Arc, Mutex},
    thread,
};
use tokio::net::TcpStream;
use tokio::signal::unix::{signal, SignalKind};

const LISTEN_BACKLOG: i32 = 128;

pub(crate) struct Worker {
    freelist: Mutex<Vec<Client>>,
    intake: SegQueue<(StdTcpStream, Client)>,
}

impl Worker {
    fn new(slots: usize, shared: &Arc<Shared>) -> Self {
        let freelist = (0..slots).map(|_| Client::new(Arc::clone(shared))).collect();
        Worker {
            freelist: Mutex::new(freelist),
            intake: SegQueue::new(),
        }
    }

    /// Free-slot count; higher means more headroom.
    pub(crate) fn score(&self) -> usize {
        self.freelist.lock().unwrap().len()
    }

    fn try_acquire(&self) -> Option<Client> {
        self.freelist.lock().unwrap().pop()
    }

    fn release(&self, client: Client) {
        self.freelist.lock().unwrap().push(client);
    }
}

/// Highest free-slot count wins; earlier workers win ties.
pub(crate) fn pick_worker(workers: &[Arc<Worker>]) -> &Arc<Worker> {
    let mut best = &workers[0];
    let mut best_score = best.score();
    for worker in &workers[1..] {
        let score = worker.score();
        if score > best_score {
            best = worker;
            best_score = score;
        }
    }
    best
}

fn accept_main(listener: StdTcpListener, workers: Arc<Vec<Arc<Worker>>>) {
    loop {
        let (stream, _peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("accept: {e}");
                continue;
            }
        };

        let worker = pick_worker(&workers);
        let Some(client) = worker.try_acquire() else {
            log::warn!("no free connection slot, dropping new client");
            continue;
        };
        if let Err(e) = stream.set_nonblocking(true) {
            log::warn!("set_nonblocking: {e}");
            worker.release(client);
            continue;
        }
        worker.intake.push((stream, client));
    }
}

fn worker_main(worker: Arc<Worker>, strategy: WaitStrategy) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("worker runtime");
    let local = tokio::task::LocalSet::new();

    local.block_on(&rt, async {
        loop {
            match worker.intake.pop() {
                Some((stream, mut client)) => {
                    match TcpStream::from_std(stream) {
                        Ok(sock) => {
                            client.sock = Some(sock);
                            let worker = Arc::clone(&worker);
                            tokio::task::spawn_local(async move {
                                let client = connection::drive_connection(client).await;
                                worker.release(client);
                            });
                        }
                        Err(e) => {
                            log::warn!("registering connection: {e}");
                            worker.release(client);
                        }
                    }
                }
                None => match strategy {
                    WaitStrategy::Yield => tokio::task::yield_now().await,
                    WaitStrategy::Sleep(interval) => tokio::time::sleep(interval).await,
                },
            }
        }
    });
}

fn prepare_listener(port: u16, ipv6: bool, dual_bind: bool) -> io::Result<StdTcpListener> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if ipv6 {
        // when IPv4 binds separately the v6 socket must not claim the
        // mapped-address space too
        socket.set_only_v6(dual_bind)?;
    }
    let addr: SocketAddr = if ipv6 {
        (Ipv6Addr::UNSPECIFIED, port).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, port).into()
    };
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

fn wait_for_shutdown() -> io::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => log::info!("caught SIGINT, shutting down"),
            _ = terminate.recv() => log::info!("caught SIGTERM, shutting down"),
        }
        Ok(())
    })
}

/// Start the server and run until SIGINT or SIGTERM.
///
/// Binds the configured address families, spawns the accept and worker
/// threads, and parks the calling thread on the signal set. Returns once
/// a shutdown signal arrives; worker threads are not joined, treat the
/// return as a signal to exit.
pub fn server_start(config: ServerConfig) -> io::Result<()> {
    let ServerConfig {
        port,
        workers: num_workers,
        slots,
        mut bind_ipv4,
        mut bind_ipv6,
        wait_strategy,
        context,
        api,
    } = config;

    if num_workers < 1 || slots < num_workers {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid worker/slot configuration: {num_workers} workers, {slots} slots"),
        ));
    }
    if !bind_ipv4 && !bind_ipv6 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no address family to bind",
        ));
    }

    // a client closing on us mid-transaction must not kill the process
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let shared = Arc::new(Shared { context, api });

    let mut listeners = Vec::new();
    if bind_ipv6 {
        match prepare_listener(port, true, bind_ipv4) {
            Ok(listener) => listeners.push(listener),
            Err(e) if e.raw_os_error() == Some(libc::EAFNOSUPPORT) => {
                log::warn!("no IPv6 support found, falling back to IPv4");
                bind_ipv6 = false;
                bind_ipv4 = true;
            }
            Err(e) => return Err(e),
        }
    }
    if bind_ipv4 {
        match prepare_listener(port, false, false) {
            Ok(listener) => listeners.push(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && bind_ipv6 => {
                // dual-binding systems hand v4 traffic to the v6 socket
                log::warn!("IPv4 bind failed with address-in-use, relying on the IPv6 socket");
            }
            Err(e) => return Err(e),
        }
    }

    // slots are divided evenly; the remainder is intentionally dropped
    let slots_per_worker = slots / num_workers;
    let workers: Arc<Vec<Arc<Worker>>> = Arc::new(
        (0..num_workers)
            .map(|_| Arc::new(Worker::new(slots_per_worker, &shared)))
            .collect(),
    );

    for (i, worker) in workers.iter().enumerate() {
        let worker = Arc::clone(worker);
        thread::Builder::new()
            .name(format!("kitserv-worker-{i}"))
            .spawn(move || worker_main(worker, wait_strategy))?;
    }
    for (i, listener) in listeners.into_iter().enumerate() {
        let workers = Arc::clone(&workers);
        thread::Builder::new()
            .name(format!("kitserv-accept-{i}"))
            .spawn(move || accept_main(listener, workers))?;
    }

    wait_for_shutdown()
}
