//! The Rost curve
//!
//! Minimum percentage identity below which an alignment of the given length
//! is not trusted (Rost, Protein Engineering 12(2), 1999;
//! <http://dx.doi.org/10.1093/protein/12.2.85>).

/// Minimum identity for an alignment of `nalign` residues.
///
/// Returns +inf for empty alignments, so they never pass.
pub fn min_identity(nalign: usize) -> f64 {
    if nalign == 0 {
        return f64::INFINITY;
    }

    let n = nalign as f64;
    480.0 * n.powf(-0.32 * (1.0 + (-n / 1000.0).exp()))
}
