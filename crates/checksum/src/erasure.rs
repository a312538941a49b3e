//! Systematic Reed-Solomon encoder over GF(2^8).
//!
//! Only encoding is needed here: the client derives one digest per shard
//! and never reconstructs.

use crate::{ChecksumError, Redundancy};

const PRIMITIVE_POLY: u8 = 0x1d;
const FIELD_SIZE: usize = 256;
const FIELD_ORDER: usize = FIELD_SIZE - 1;

struct GfTables {
    exp: [u8; FIELD_SIZE * 2],
    log: [u8; FIELD_SIZE],
}

impl GfTables {
    const fn build() -> Self {
        let mut exp = [0u8; FIELD_SIZE * 2];
        let mut log = [0u8; FIELD_SIZE];
        let mut value: u8 = 1;
        let mut i = 0usize;
        while i < FIELD_ORDER {
            exp[i] = value;
            log[value as usize] = i as u8;
            value = mul_no_tables(value, 2);
            i += 1;
        }
        let mut j = FIELD_ORDER;
        while j < exp.len() {
            exp[j] = exp[j - FIELD_ORDER];
            j += 1;
        }
        Self { exp, log }
    }
}

const TABLES: GfTables = GfTables::build();

const fn mul_no_tables(mut a: u8, mut b: u8) -> u8 {
    let mut product: u8 = 0;
    let mut i = 0;
    while i < 8 {
        if (b & 1) != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= PRIMITIVE_POLY;
        }
        b >>= 1;
        i += 1;
    }
    product
}

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let log_a = TABLES.log[a as usize] as usize;
    let log_b = TABLES.log[b as usize] as usize;
    TABLES.exp[log_a + log_b]
}

/// Splits a segment into data shards and appends parity shards.
#[derive(Debug, Clone)]
pub struct ErasureEncoder {
    data: usize,
    parity: usize,
    /// Vandermonde coefficients, one row per parity shard.
    parity_rows: Vec<Vec<u8>>,
}

impl ErasureEncoder {
    /// Builds an encoder for the given layout.
    pub fn new(redundancy: &Redundancy) -> Result<Self, ChecksumError> {
        redundancy.validate()?;
        let data = redundancy.data_shards;
        let parity = redundancy.parity_shards;
        let mut parity_rows = vec![vec![0u8; data]; parity];
        for (row, coeffs) in parity_rows.iter_mut().enumerate() {
            let base = TABLES.exp[row];
            let mut coeff = 1u8;
            for slot in coeffs.iter_mut() {
                *slot = coeff;
                coeff = gf_mul(coeff, base);
            }
        }
        Ok(Self {
            data,
            parity,
            parity_rows,
        })
    }

    /// Total shards produced per segment.
    pub fn total_shards(&self) -> usize {
        self.data + self.parity
    }

    /// Encodes `segment` into `data + parity` equally sized shards.
    ///
    /// The last data shard is zero-padded. An empty segment yields empty
    /// shards.
    pub fn encode(&self, segment: &[u8]) -> Vec<Vec<u8>> {
        let shard_len = segment.len().div_ceil(self.data);
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());
        for i in 0..self.data {
            let start = usize::min(i * shard_len, segment.len());
            let end = usize::min(start + shard_len, segment.len());
            let mut shard = vec![0u8; shard_len];
            shard[..end - start].copy_from_slice(&segment[start..end]);
            shards.push(shard);
        }
        for coeffs in &self.parity_rows {
            let mut parity = vec![0u8; shard_len];
            for (col, coeff) in coeffs.iter().enumerate() {
                if *coeff == 0 {
                    continue;
                }
                for (dst, src) in parity.iter_mut().zip(shards[col].iter()) {
                    *dst ^= gf_mul(*coeff, *src);
                }
            }
            shards.push(parity);
        }
        shards
    }
}
