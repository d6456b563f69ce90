//! Number-theory primitives behind the built-in factoring routine.
//!
//! Everything here works on `BigUint`. The splitting routine is cancellable:
//! it polls a shared `AtomicBool` so a supervising thread can stop it early.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trial division bound used before falling back to Pollard rho.
pub const TRIAL_DIVISION_BOUND: u64 = 10_000;

/// Miller-Rabin rounds used when deciding whether an input is worth splitting.
const PRIMALITY_ROUNDS: u32 = 20;

/// Number of differing bits between the binary representations of `a` and `b`.
///
/// The shorter operand is implicitly zero-padded.
pub fn hamming_distance(a: &BigUint, b: &BigUint) -> u64 {
    (a ^ b).count_ones()
}

/// Miller-Rabin probabilistic primality test.
pub fn is_probably_prime(n: &BigUint, rounds: u32) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);

    if *n < two {
        return false;
    }
    if *n == two || *n == three {
        return true;
    }
    if n.is_even() {
        return false;
    }

    // n - 1 = 2^r * d
    let n_minus_1 = n - &one;
    let mut d = n_minus_1.clone();
    let mut r: u32 = 0;
    while d.is_even() {
        d >>= 1u32;
        r += 1;
    }

    let mut rng = rand::thread_rng();
    let width = n.to_bytes_be().len();

    'witness: for _ in 0..rounds {
        // Random a in [2, n-2]
        let a = loop {
            let mut random_bytes = vec![0u8; width];
            rng.fill(&mut random_bytes[..]);
            let a = BigUint::from_bytes_be(&random_bytes) % n;
            if a >= two && a < n_minus_1 {
                break a;
            }
        };

        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_1 {
            continue 'witness;
        }

        for _ in 0..r - 1 {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }

        return false;
    }

    true
}

/// Trial division by 2 and odd divisors up to `bound`.
///
/// Returns the prime factors found in ascending order; whatever cofactor
/// remains above 1 is appended last (it may be composite).
pub fn trial_division(n: &BigUint, bound: u64) -> Vec<BigUint> {
    let mut factors = Vec::new();
    if n.is_zero() {
        return factors;
    }

    let mut remaining = n.clone();
    let two = BigUint::from(2u32);
    while remaining.is_even() {
        factors.push(two.clone());
        remaining >>= 1u32;
    }

    let mut divisor = 3u64;
    while divisor <= bound && BigUint::from(divisor) * BigUint::from(divisor) <= remaining {
        let big_divisor = BigUint::from(divisor);
        while (&remaining % &big_divisor).is_zero() {
            factors.push(big_divisor.clone());
            remaining /= &big_divisor;
        }
        divisor += 2;
    }

    if remaining > BigUint::one() {
        factors.push(remaining);
    }

    factors
}

/// Pollard's rho (Brent variant) with an early-stop flag.
///
/// `seed` picks the polynomial constant and starting point, so callers can
/// retry with a new seed after a trivial cycle. Returns `None` when `stop`
/// is raised, when the cycle is trivial, or when the iteration cap is hit.
pub fn pollard_rho_brent_stoppable(
    n: &BigUint,
    stop: &AtomicBool,
    seed: u64,
) -> Option<BigUint> {
    let one = BigUint::one();
    let two = BigUint::from(2u32);

    if *n <= one {
        return None;
    }
    if n.is_even() {
        return Some(two);
    }

    let c = {
        let seed_big = BigUint::from(seed) % n;
        if seed_big.is_zero() || seed_big == n - &two {
            BigUint::from(seed.wrapping_add(1)) % n
        } else {
            seed_big
        }
    };

    let mut y = BigUint::from(seed.wrapping_mul(7).wrapping_add(3)) % n;
    if y.is_zero() {
        y = one.clone();
    }

    let f = |x: &BigUint| -> BigUint { (x * x + &c) % n };

    let mut r: u64 = 1;
    let mut q = BigUint::one();
    let mut ys = y.clone();
    let mut x = y.clone();
    let mut d = BigUint::one();

    while d == one {
        if stop.load(Ordering::Relaxed) {
            return None;
        }

        x = y.clone();
        for _ in 0..r {
            y = f(&y);
        }

        let mut k: u64 = 0;
        while k < r && d == one {
            if stop.load(Ordering::Relaxed) {
                return None;
            }

            ys = y.clone();
            let batch_size = std::cmp::min(100, r - k);
            for _ in 0..batch_size {
                y = f(&y);
                let diff = if y > x { &y - &x } else { &x - &y };
                q = (q * &diff) % n;
            }
            d = q.gcd(n);
            k += batch_size;
        }

        r *= 2;
        if r > 2_000_000 {
            return None;
        }
    }

    if d == *n {
        // Batch gcd overshot; walk forward from the saved point one step at a time.
        let d2 = loop {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            ys = f(&ys);
            let diff = if ys > x { &ys - &x } else { &x - &ys };
            let g = diff.gcd(n);
            if g != one {
                break g;
            }
        };
        return if d2 == *n { None } else { Some(d2) };
    }

    if d > one && d < *n {
        Some(d)
    } else {
        None
    }
}

/// Split `n` into two nontrivial factors `(small, large)`.
///
/// Tries trial division first, then Pollard rho (Brent) with successive
/// seeds until a factor turns up or `stop` is raised. Returns `None` for
/// n < 4, for primes, and on cancellation.
pub fn split(n: &BigUint, stop: &AtomicBool) -> Option<(BigUint, BigUint)> {
    if *n < BigUint::from(4u32) {
        return None;
    }

    let small = trial_division(n, TRIAL_DIVISION_BOUND);
    if small.len() >= 2 {
        let p = small[0].clone();
        let q = n / &p;
        return Some(ordered(p, q));
    }

    if is_probably_prime(n, PRIMALITY_ROUNDS) {
        return None;
    }

    let mut seed = 2u64;
    while !stop.load(Ordering::Relaxed) {
        if let Some(d) = pollard_rho_brent_stoppable(n, stop, seed) {
            let q = n / &d;
            return Some(ordered(d, q));
        }
        seed += 1;
    }

    None
}

fn ordered(a: BigUint, b: BigUint) -> (BigUint, BigUint) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
