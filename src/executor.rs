//! Worker-pool abstraction for the two CPU-bound bulk operations: searching
//! for group parameters and rerandomizing every block. Two backends are
//! provided, selected by `ExecutorKind`: a `rayon` thread pool, and a
//! process pool that re-execs this same binary in a hidden worker mode and
//! talks line-delimited JSON over stdio — the idiomatic Rust shape for
//! "process pool" since there is no `fork()`-and-pickle-a-closure
//! equivalent here.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use num_bigint::BigUint;
use rand::rngs::OsRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::block::{self, Block};
use crate::error::{Error, Result};
use crate::group::{self, GroupParams, GroupProgress};
use crate::rerandomize;

pub const RERAND_WORKER_ENV: &str = "QUIETSAFE_RERAND_WORKER";
pub const PRIME_WORKER_ENV: &str = "QUIETSAFE_PRIME_WORKER";

pub trait Executor: Send + Sync {
    fn rerandomize_all(&self, blocks: &[Block], gp: &GroupParams) -> Result<Vec<Block>>;
    fn search_safe_prime(
        &self,
        bits: u64,
        progress: &(dyn Fn(GroupProgress) + Sync),
    ) -> Result<(BigUint, BigUint)>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorKind {
    Threads,
    Processes,
}

pub fn build(kind: ExecutorKind, nworkers: usize) -> Box<dyn Executor> {
    match kind {
        ExecutorKind::Threads => Box::new(ThreadExecutor::new(nworkers)),
        ExecutorKind::Processes => Box::new(ProcessExecutor::new(nworkers)),
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// ---------------------------------------------------------------------
// Thread backend
// ---------------------------------------------------------------------

pub struct ThreadExecutor {
    pool: rayon::ThreadPool,
}

impl ThreadExecutor {
    pub fn new(nworkers: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nworkers.max(1))
            .build()
            .expect("failed to build rerandomization thread pool");
        ThreadExecutor { pool }
    }
}

impl Executor for ThreadExecutor {
    fn rerandomize_all(&self, blocks: &[Block], gp: &GroupParams) -> Result<Vec<Block>> {
        Ok(self.pool.install(|| {
            blocks
                .par_iter()
                .map(|b| {
                    let mut rng = OsRng;
                    rerandomize::rerandomize_block(b, gp, &mut rng)
                })
                .collect()
        }))
    }

    fn search_safe_prime(
        &self,
        bits: u64,
        progress: &(dyn Fn(GroupProgress) + Sync),
    ) -> Result<(BigUint, BigUint)> {
        let found: std::sync::Mutex<Option<(BigUint, BigUint)>> = std::sync::Mutex::new(None);
        let tested = AtomicU64::new(0);
        let nthreads = self.pool.current_num_threads().max(1);
        self.pool.install(|| {
            (0..nthreads).into_par_iter().for_each(|_| {
                let mut rng = OsRng;
                loop {
                    if found.lock().unwrap().is_some() {
                        return;
                    }
                    if let Some(pair) = group::try_safe_prime_candidate(bits, &mut rng) {
                        let mut slot = found.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(pair);
                        }
                        return;
                    }
                    let n = tested.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % 8 == 0 {
                        progress(GroupProgress::Searching { tested: n });
                    }
                }
            });
        });
        found
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::Crypto("no worker found a safe prime".into()))
    }
}

// ---------------------------------------------------------------------
// Process backend
// ---------------------------------------------------------------------

pub struct ProcessExecutor {
    nworkers: usize,
}

impl ProcessExecutor {
    pub fn new(nworkers: usize) -> Self {
        ProcessExecutor {
            nworkers: nworkers.max(1),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RerandRequest {
    c1: String,
    c2: String,
    h: String,
    g: String,
    p: String,
}

#[derive(Serialize, Deserialize)]
struct RerandResponse {
    c1: String,
    c2: String,
    h: String,
}

impl Executor for ProcessExecutor {
    fn rerandomize_all(&self, blocks: &[Block], gp: &GroupParams) -> Result<Vec<Block>> {
        if blocks.is_empty() {
            return Ok(Vec::new());
        }
        let nworkers = self.nworkers.min(blocks.len()).max(1);
        let chunk_size = blocks.len().div_ceil(nworkers);
        let chunks: Vec<&[Block]> = blocks.chunks(chunk_size).collect();
        let g_hex = block::biguint_to_hex(&gp.g);
        let p_hex = block::biguint_to_hex(&gp.p);

        let mut children: Vec<Child> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let exe = std::env::current_exe()?;
            let mut child = Command::new(&exe)
                .env(RERAND_WORKER_ENV, "1")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()?;
            let mut stdin = child.stdin.take().expect("piped stdin");
            for b in chunk.iter() {
                let req = RerandRequest {
                    c1: block::biguint_to_hex(&b.c1),
                    c2: block::biguint_to_hex(&b.c2),
                    h: block::biguint_to_hex(&b.h),
                    g: g_hex.clone(),
                    p: p_hex.clone(),
                };
                let line = serde_json::to_string(&req)
                    .map_err(|e| Error::Crypto(format!("encode rerand request: {e}")))?;
                writeln!(stdin, "{line}")?;
            }
            drop(stdin);
            children.push(child);
        }

        let mut results = Vec::with_capacity(blocks.len());
        for (child, chunk) in children.into_iter().zip(chunks.iter()) {
            let output = child.wait_with_output()?;
            if !output.status.success() {
                return Err(Error::Crypto(
                    "rerandomization worker process exited with an error".into(),
                ));
            }
            let text = String::from_utf8_lossy(&output.stdout);
            let mut chunk_results = Vec::with_capacity(chunk.len());
            for line in text.lines() {
                let resp: RerandResponse = serde_json::from_str(line)
                    .map_err(|e| Error::Crypto(format!("decode rerand response: {e}")))?;
                chunk_results.push(Block::new(
                    block::biguint_from_hex(&resp.c1)
                        .map_err(|e| Error::Crypto(e.to_string()))?,
                    block::biguint_from_hex(&resp.c2)
                        .map_err(|e| Error::Crypto(e.to_string()))?,
                    block::biguint_from_hex(&resp.h).map_err(|e| Error::Crypto(e.to_string()))?,
                ));
            }
            if chunk_results.len() != chunk.len() {
                return Err(Error::Crypto(
                    "rerandomization worker returned the wrong number of blocks".into(),
                ));
            }
            results.extend(chunk_results);
        }
        Ok(results)
    }

    fn search_safe_prime(
        &self,
        bits: u64,
        progress: &(dyn Fn(GroupProgress) + Sync),
    ) -> Result<(BigUint, BigUint)> {
        let mut children: Vec<Child> = Vec::with_capacity(self.nworkers);
        for _ in 0..self.nworkers {
            let exe = std::env::current_exe()?;
            let child = Command::new(&exe)
                .env(PRIME_WORKER_ENV, bits.to_string())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()?;
            children.push(child);
        }

        let total = AtomicU64::new(0);
        let (tx, rx) = mpsc::channel::<(String, String)>();
        let winner = std::thread::scope(|scope| {
            for child in children.iter_mut() {
                let stdout = child.stdout.take().expect("piped stdout");
                let txc = tx.clone();
                let total = &total;
                scope.spawn(move || {
                    let reader = BufReader::new(stdout);
                    let mut last_seen = 0u64;
                    for line in reader.lines().map_while(|l| l.ok()) {
                        if let Some(rest) = line.strip_prefix("F ") {
                            let mut parts = rest.split_whitespace();
                            if let (Some(qh), Some(ph)) = (parts.next(), parts.next()) {
                                let _ = txc.send((qh.to_string(), ph.to_string()));
                            }
                            return;
                        } else if let Some(rest) = line.strip_prefix("T ") {
                            if let Ok(n) = rest.trim().parse::<u64>() {
                                let delta = n.saturating_sub(last_seen);
                                last_seen = n;
                                let t = total.fetch_add(delta, Ordering::Relaxed) + delta;
                                progress(GroupProgress::Searching { tested: t });
                            }
                        }
                    }
                });
            }
            drop(tx);
            rx.recv().ok()
        });

        for child in children.iter_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }

        let (qh, ph) = winner.ok_or_else(|| {
            Error::Crypto("no worker process found a safe prime".into())
        })?;
        Ok((
            block::biguint_from_hex(&qh).map_err(|e| Error::Crypto(e.to_string()))?,
            block::biguint_from_hex(&ph).map_err(|e| Error::Crypto(e.to_string()))?,
        ))
    }
}

// ---------------------------------------------------------------------
// Worker entry points, dispatched from `main` before argument parsing.
// ---------------------------------------------------------------------

/// Body of the rerandomization worker process: read one JSON request per
/// line from stdin, write one JSON response per line to stdout, until EOF.
pub fn run_rerand_worker() -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut rng = OsRng;
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let req: RerandRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let (Ok(c1), Ok(c2), Ok(h), Ok(g), Ok(p)) = (
            block::biguint_from_hex(&req.c1),
            block::biguint_from_hex(&req.c2),
            block::biguint_from_hex(&req.h),
            block::biguint_from_hex(&req.g),
            block::biguint_from_hex(&req.p),
        ) else {
            continue;
        };
        let gp = GroupParams { g, p };
        let block = Block::new(c1, c2, h);
        let refreshed = rerandomize::rerandomize_block(&block, &gp, &mut rng);
        let resp = RerandResponse {
            c1: block::biguint_to_hex(&refreshed.c1),
            c2: block::biguint_to_hex(&refreshed.c2),
            h: block::biguint_to_hex(&refreshed.h),
        };
        writeln!(out, "{}", serde_json::to_string(&resp)?)?;
    }
    Ok(())
}

/// Body of the group-parameter-search worker process: hunt for a safe
/// prime pair forever, reporting progress and the final result on stdout.
pub fn run_prime_worker(bits: u64) {
    let mut rng = OsRng;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut tested: u64 = 0;
    loop {
        if let Some((q, p)) = group::try_safe_prime_candidate(bits, &mut rng) {
            let _ = writeln!(
                out,
                "F {} {}",
                block::biguint_to_hex(&q),
                block::biguint_to_hex(&p)
            );
            let _ = out.flush();
            return;
        }
        tested += 1;
        if tested % 8 == 0 {
            let _ = writeln!(out, "T {tested}");
            let _ = out.flush();
        }
    }
}
