//! Key-space layout shared by every process talking to the fast-path store.
//!
//! ```text
//! stock:{productId}                  -> integer counter
//! stock_lock:{productId}             -> lock owner token (TTL)
//! reservation:{userId}:{productId}   -> JSON reservation record (TTL)
//! ```

use common::{ProductId, UserId};

pub const STOCK_PREFIX: &str = "stock:";
pub const LOCK_PREFIX: &str = "stock_lock:";
pub const RESERVATION_PREFIX: &str = "reservation:";

/// Counter key for a product.
pub fn stock_key(product_id: &ProductId) -> String {
    format!("{STOCK_PREFIX}{product_id}")
}

/// Lock claim key for a product.
pub fn lock_key(product_id: &ProductId) -> String {
    format!("{LOCK_PREFIX}{product_id}")
}

/// Reservation record key for a (user, product) pair.
pub fn reservation_key(user_id: &UserId, product_id: &ProductId) -> String {
    format!("{RESERVATION_PREFIX}{user_id}:{product_id}")
}

/// Matches every stock counter.
pub fn all_stock_pattern() -> String {
    format!("{STOCK_PREFIX}*")
}

/// Matches every lock claim.
pub fn all_locks_pattern() -> String {
    format!("{LOCK_PREFIX}*")
}

/// Matches every reservation record.
pub fn all_reservations_pattern() -> String {
    format!("{RESERVATION_PREFIX}*")
}

/// Matches every reservation for one product, across users.
///
/// Ids may contain `:`, so this can also match keys of another product whose
/// id ends in `:{product_id}`. Callers must check the decoded record.
pub fn product_reservations_pattern(product_id: &ProductId) -> String {
    format!("{RESERVATION_PREFIX}*:{}", escape_glob(product_id.as_str()))
}

/// Matches every reservation held by one user.
///
/// Same caveat as [`product_reservations_pattern`] for user ids containing `:`.
pub fn user_reservations_pattern(user_id: &UserId) -> String {
    format!("{RESERVATION_PREFIX}{}:*", escape_glob(user_id.as_str()))
}

/// Backslash-escapes the glob metacharacters `*`, `?`, `[`, `]` and `\`.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Extracts the product id from a stock counter key.
pub fn product_from_stock_key(key: &str) -> Option<ProductId> {
    key.strip_prefix(STOCK_PREFIX).map(ProductId::from)
}

/// Redis-style glob match supporting `*`, `?` and `\` escapes.
///
/// This is the subset of `MATCH` semantics the key-space above relies on;
/// the in-memory backend uses it to emulate `SCAN ... MATCH`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p = tokenize(pattern);
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_ki = 0usize;

    while ki < k.len() {
        let matches_here = match p.get(pi) {
            Some(GlobToken::AnyOne) => true,
            Some(GlobToken::Literal(c)) => *c == k[ki],
            _ => false,
        };

        if matches_here {
            pi += 1;
            ki += 1;
        } else if p.get(pi) == Some(&GlobToken::AnyRun) {
            star = Some(pi);
            star_ki = ki;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ki += 1;
            ki = star_ki;
        } else {
            return false;
        }
    }

    while p.get(pi) == Some(&GlobToken::AnyRun) {
        pi += 1;
    }
    pi == p.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobToken {
    Literal(char),
    AnyOne,
    AnyRun,
}

fn tokenize(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => GlobToken::AnyRun,
            '?' => GlobToken::AnyOne,
            // A trailing backslash matches itself.
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            other => GlobToken::Literal(other),
        });
    }
    tokens
}
