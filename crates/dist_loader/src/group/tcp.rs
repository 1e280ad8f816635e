//! src/group/tcp.rs
//!
//! Process group over TCP.
//!
//! Star topology centred on rank 0: every other rank opens one connection to
//! rank 0 and announces its rank as a big-endian `u32`. A barrier is one token
//! from each peer to rank 0 followed by one token from rank 0 back to each
//! peer, so rank 0 releases nobody before everyone has arrived.

use log::debug;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::ProcessGroup;
use crate::error::{LoaderError, Result};

const BARRIER_TOKEN: u8 = 0xB7;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_ATTEMPTS: usize = 200;

/// Group member connected to its peers over TCP.
pub struct TcpGroup {
    rank: usize,
    world_size: usize,
    // Rank 0: one stream per peer, ordered by rank. Others: the stream to rank 0.
    links: Mutex<Vec<TcpStream>>,
}

impl TcpGroup {
    /// Rank 0 side: accepts `world_size - 1` peers on `listener`.
    pub fn host(listener: TcpListener, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(LoaderError::InvalidContext(
                "world_size must be > 0".to_string(),
            ));
        }

        let mut peers: Vec<Option<TcpStream>> = (1..world_size).map(|_| None).collect();
        while peers.iter().any(Option::is_none) {
            let (mut stream, addr) = listener
                .accept()
                .map_err(|e| LoaderError::Rendezvous(format!("accept failed: {}", e)))?;

            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).map_err(|e| {
                LoaderError::Rendezvous(format!("no rank announced by {}: {}", addr, e))
            })?;
            let rank = u32::from_be_bytes(buf) as usize;

            if rank == 0 || rank >= world_size {
                return Err(LoaderError::Rendezvous(format!(
                    "peer {} announced rank {} outside [1, {})",
                    addr, rank, world_size
                )));
            }
            if peers[rank - 1].is_some() {
                return Err(LoaderError::Rendezvous(format!(
                    "rank {} joined twice (second time from {})",
                    rank, addr
                )));
            }

            stream
                .set_nodelay(true)
                .map_err(|e| LoaderError::Rendezvous(e.to_string()))?;
            debug!("TcpGroup rank 0 accepted rank {} from {}", rank, addr);
            peers[rank - 1] = Some(stream);
        }

        Ok(Self {
            rank: 0,
            world_size,
            links: Mutex::new(peers.into_iter().flatten().collect()),
        })
    }

    /// Non-zero rank side: connects to rank 0 at `addr`, retrying while the
    /// host is not listening yet.
    pub fn join(addr: SocketAddr, rank: usize, world_size: usize) -> Result<Self> {
        if rank == 0 || rank >= world_size {
            return Err(LoaderError::InvalidContext(format!(
                "joining rank must be in [1, {}), got {}",
                world_size, rank
            )));
        }

        let mut attempt = 0;
        let mut stream = loop {
            match TcpStream::connect(addr) {
                Ok(stream) => break stream,
                Err(e) if attempt + 1 < CONNECT_ATTEMPTS => {
                    attempt += 1;
                    debug!("TcpGroup rank {} waiting for {} ({})", rank, addr, e);
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(LoaderError::Rendezvous(format!(
                        "could not reach rank 0 at {} after {} attempts: {}",
                        addr, CONNECT_ATTEMPTS, e
                    )))
                }
            }
        };

        let announce = u32::try_from(rank)
            .map_err(|_| LoaderError::InvalidContext(format!("rank {} too large", rank)))?;
        stream
            .set_nodelay(true)
            .and_then(|_| stream.write_all(&announce.to_be_bytes()))
            .map_err(|e| LoaderError::Rendezvous(e.to_string()))?;

        Ok(Self {
            rank,
            world_size,
            links: Mutex::new(vec![stream]),
        })
    }
}

fn recv_token(stream: &mut TcpStream) -> io::Result<()> {
    let mut buf = [0u8; 1];
    stream.read_exact(&mut buf)?;
    if buf[0] != BARRIER_TOKEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected barrier token {:#04x}", buf[0]),
        ));
    }
    Ok(())
}

impl ProcessGroup for TcpGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn barrier(&self) -> Result<()> {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);

        let outcome = if self.rank == 0 {
            links
                .iter_mut()
                .try_for_each(recv_token)
                .and_then(|_| {
                    links
                        .iter_mut()
                        .try_for_each(|s| s.write_all(&[BARRIER_TOKEN]))
                })
        } else {
            let stream = &mut links[0];
            stream
                .write_all(&[BARRIER_TOKEN])
                .and_then(|_| recv_token(stream))
        };

        outcome.map_err(LoaderError::Barrier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tcp_barrier_releases_after_all_arrive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let world_size = 3;
        let arrived = Arc::new(AtomicUsize::new(0));

        let peers: Vec<_> = (1..world_size)
            .map(|rank| {
                let arrived = arrived.clone();
                thread::spawn(move || {
                    let group = TcpGroup::join(addr, rank, world_size).unwrap();
                    for round in 1..=2 {
                        arrived.fetch_add(1, Ordering::SeqCst);
                        group.barrier().unwrap();
                        assert!(arrived.load(Ordering::SeqCst) >= round * world_size);
                    }
                })
            })
            .collect();

        let host = TcpGroup::host(listener, world_size).unwrap();
        for round in 1..=2 {
            arrived.fetch_add(1, Ordering::SeqCst);
            host.barrier().unwrap();
            assert!(arrived.load(Ordering::SeqCst) >= round * world_size);
        }

        for p in peers {
            p.join().unwrap();
        }
    }

    #[test]
    fn join_rejects_rank_zero() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            TcpGroup::join(addr, 0, 2),
            Err(LoaderError::InvalidContext(_))
        ));
    }
}
