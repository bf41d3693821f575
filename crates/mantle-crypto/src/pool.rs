//! Bounded parallel decryption.
//!
//! Templates may carry many protected values. Each distinct payload is
//! decrypted once, up to `concurrency` at a time, before the template runs;
//! the `decrypt` template function then answers from the resulting map.

use std::collections::HashMap;
use std::thread;

use crossbeam_channel::unbounded;

use crate::cipher::Cipher;
use crate::error::Result;

/// Decrypts every payload in `payloads` using at most `concurrency` workers.
///
/// Results are returned in input order. A concurrency of `0` is treated as
/// `1`; with a single worker or a single payload no threads are spawned.
pub fn decrypt_all(cipher: &Cipher, payloads: &[&str], concurrency: usize) -> Vec<Result<String>> {
    let workers = concurrency.max(1).min(payloads.len());
    if workers <= 1 {
        return payloads.iter().map(|p| cipher.decrypt(p)).collect();
    }

    tracing::debug!(values = payloads.len(), workers, "decrypting protected values");

    let (job_tx, job_rx) = unbounded::<(usize, &str)>();
    let (result_tx, result_rx) = unbounded::<(usize, Result<String>)>();

    for job in payloads.iter().copied().enumerate() {
        // Receivers are alive until the scope below ends.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (index, payload) in job_rx.iter() {
                    if result_tx.send((index, cipher.decrypt(payload))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<(usize, Result<String>)> = result_rx.iter().collect();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

/// Decrypts the distinct payloads in `payloads` and maps each to its plaintext.
///
/// Stops at the first failure, reporting the payload's error.
pub fn decrypt_distinct<'a, I>(
    cipher: &Cipher,
    payloads: I,
    concurrency: usize,
) -> Result<HashMap<String, String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut distinct: Vec<&str> = Vec::new();
    for payload in payloads {
        if !distinct.contains(&payload) {
            distinct.push(payload);
        }
    }

    let results = decrypt_all(cipher, &distinct, concurrency);
    let mut plaintexts = HashMap::with_capacity(distinct.len());
    for (payload, result) in distinct.into_iter().zip(results) {
        plaintexts.insert(payload.to_string(), result?);
    }
    Ok(plaintexts)
}
