//! Bit-layout utilities on top of the circuit builder.
//!
//! These operations only rearrange lanes or build balanced gate trees; they
//! never depend on secret values and are constant-time by construction.

use crate::circuit::{CircuitBuilder, CircuitError, Wire};

/// Splits 8-bit wire bundles into 1-bit wires, most-significant bit first.
///
/// Fails with [`CircuitError::ShapeMismatch`] if any input bundle is not
/// exactly 8 bits wide.
pub fn split_to_bits(
    b: &mut CircuitBuilder,
    bundles: &[Wire],
) -> Result<Vec<Wire>, CircuitError> {
    let mut bits = Vec::with_capacity(bundles.len() * 8);
    for &bundle in bundles {
        let width = b.width(bundle);
        if width != 8 {
            return Err(CircuitError::ShapeMismatch {
                expected: 8,
                actual: width,
            });
        }
        for lane in 0..8 {
            bits.push(b.select(bundle, vec![lane])?);
        }
    }
    Ok(bits)
}

/// Concatenates 1-bit wires into 8-bit bundles, most-significant bit first.
///
/// The final partial group is padded with `zero` in its low bits.
pub fn concat_to_bytes(
    b: &mut CircuitBuilder,
    bits: &[Wire],
    zero: Wire,
) -> Result<Vec<Wire>, CircuitError> {
    for &bit in bits.iter().chain([&zero]) {
        let width = b.width(bit);
        if width != 1 {
            return Err(CircuitError::ShapeMismatch {
                expected: 1,
                actual: width,
            });
        }
    }
    let mut bytes = vec![];
    for group in bits.chunks(8) {
        let mut lanes = group.to_vec();
        while lanes.len() < 8 {
            lanes.push(zero);
        }
        bytes.push(b.concat(&lanes)?);
    }
    Ok(bytes)
}

/// Packs parallel wires into a single SIMD wire (lane concatenation).
pub fn simdify(b: &mut CircuitBuilder, wires: &[Wire]) -> Result<Wire, CircuitError> {
    b.concat(wires)
}

/// Unpacks a SIMD wire into its individual 1-bit lanes.
pub fn unsimdify(b: &mut CircuitBuilder, wire: Wire) -> Result<Vec<Wire>, CircuitError> {
    (0..b.width(wire))
        .map(|lane| b.select(wire, vec![lane]))
        .collect()
}

/// Reduces a list of equal-width wires with a balanced binary tree,
/// producing logarithmic multiplicative depth.
pub fn low_depth_reduce<F>(
    b: &mut CircuitBuilder,
    wires: Vec<Wire>,
    mut op: F,
) -> Result<Wire, CircuitError>
where
    F: FnMut(&mut CircuitBuilder, Wire, Wire) -> Result<Wire, CircuitError>,
{
    if wires.is_empty() {
        return Err(CircuitError::EmptyOperands);
    }
    let mut layer = wires;
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        let mut pairs = layer.chunks_exact(2);
        for pair in &mut pairs {
            next.push(op(b, pair[0], pair[1])?);
        }
        next.extend(pairs.remainder());
        layer = next;
    }
    Ok(layer[0])
}

/// Reduces all lanes of a single SIMD wire to one bit with a balanced tree.
///
/// Each tree layer halves the wire by combining its first and second half
/// with one gate, so the whole reduction needs `ceil(log2(width))` gates.
pub fn low_depth_reduce_lanes<F>(
    b: &mut CircuitBuilder,
    wire: Wire,
    mut op: F,
) -> Result<Wire, CircuitError>
where
    F: FnMut(&mut CircuitBuilder, Wire, Wire) -> Result<Wire, CircuitError>,
{
    let mut wire = wire;
    let mut width = b.width(wire);
    while width > 1 {
        let half = width / 2;
        let lo = b.select(wire, (0..half).collect())?;
        let hi = b.select(wire, (half..2 * half).collect())?;
        let mut combined = op(b, lo, hi)?;
        if width % 2 == 1 {
            let rest = b.select(wire, vec![width - 1])?;
            combined = b.concat(&[combined, rest])?;
        }
        wire = combined;
        width = b.width(wire);
    }
    Ok(wire)
}
