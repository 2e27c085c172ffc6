//! Tenant → host namespace translation.

use crate::ClusterId;

/// Max length of a DNS-1123 label (and therefore of a namespace).
pub const DNS_LABEL_MAX: usize = 63;

const HASHED_PREFIX_MAX: usize = DNS_LABEL_MAX - "t-".len() - "-".len() - 16;

/// Check `s` is a DNS-1123 label: lowercase alphanumerics and '-', alphanumeric
/// at both ends, at most 63 bytes.
pub fn validate_dns_label(s: &str) -> Result<(), &'static str> {
    if s.is_empty() { return Err("must not be empty"); }
    if s.len() > DNS_LABEL_MAX { return Err("must be at most 63 characters"); }
    let ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let bytes = s.as_bytes();
    if !bytes.iter().all(|&b| ok(b) || b == b'-') { return Err("must consist of lowercase alphanumerics or '-'"); }
    if !ok(bytes[0]) || !ok(bytes[bytes.len() - 1]) { return Err("must start and end with an alphanumeric"); }
    Ok(())
}

fn fnv1a64(parts: &[&[u8]]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
    for (i, part) in parts.iter().enumerate() {
        if i > 0 { h ^= 0xff; h = h.wrapping_mul(0x100000001b3); } // separator, never in a label
        for b in part.iter() { h ^= *b as u64; h = h.wrapping_mul(0x100000001b3); }
    }
    h
}

/// Map a tenant `(cluster, namespace)` to its host namespace.
///
/// Short pairs use `{len(cluster)}-{cluster}-{namespace}`; the length prefix
/// fixes where the cluster ends, so distinct pairs never render the same.
/// Pairs that would overflow a DNS label use `t-{readable prefix}-{fnv64}`.
/// The first family always starts with a digit and the second with `t`.
pub fn to_host_namespace(cluster: &ClusterId, namespace: &str) -> String {
    let cluster = cluster.as_str();
    let direct = format!("{}-{}-{}", cluster.len(), cluster, namespace);
    if direct.len() <= DNS_LABEL_MAX {
        return direct;
    }
    let hash = fnv1a64(&[cluster.as_bytes(), namespace.as_bytes()]);
    let readable = format!("{cluster}-{namespace}");
    let mut prefix: &str = &readable[..HASHED_PREFIX_MAX.min(readable.len())];
    prefix = prefix.trim_end_matches('-');
    format!("t-{prefix}-{hash:016x}")
}
