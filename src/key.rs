//! Keys of coordinate maps and kernel maps.

use rand::{distributions::Alphanumeric, Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use std::{fmt, mem};

use crate::params::{KernelParams, RegionType};

/// Key of a coordinate set within a [`CoordinateMapManager`].
///
/// [`CoordinateMapManager`]: crate::CoordinateMapManager
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordinateMapKey {
    tensor_stride: Vec<u32>,
    identifier: String,
}

impl CoordinateMapKey {
    /// Creates a key.
    pub fn new(tensor_stride: impl Into<Vec<u32>>, identifier: impl Into<String>) -> Self {
        Self {
            tensor_stride: tensor_stride.into(),
            identifier: identifier.into(),
        }
    }

    /// Tensor stride of the keyed coordinate set.
    pub fn tensor_stride(&self) -> &[u32] {
        &self.tensor_stride
    }

    /// String identifier distinguishing sets with the same tensor stride.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Spatial dimension of the keyed coordinate set.
    pub fn dimension(&self) -> usize {
        self.tensor_stride.len()
    }
}

impl fmt::Display for CoordinateMapKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:?}/{}", self.tensor_stride, self.identifier)
    }
}

/// Cache key of a kernel map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum KernelMapKey {
    Convolution {
        input: CoordinateMapKey,
        output: CoordinateMapKey,
        kernel_size: Vec<u32>,
        kernel_stride: Vec<u32>,
        kernel_dilation: Vec<u32>,
        region_type: RegionType,
        /// Flattened offsets of a custom region; empty for other regions.
        offsets: Vec<i32>,
        is_transpose: bool,
        is_pool: bool,
    },
    Pruning {
        input: CoordinateMapKey,
        output: CoordinateMapKey,
    },
    Union {
        inputs: Vec<CoordinateMapKey>,
        output: CoordinateMapKey,
    },
    GlobalReduction {
        input: CoordinateMapKey,
        output: CoordinateMapKey,
    },
}

impl KernelMapKey {
    pub fn convolution(
        input: &CoordinateMapKey,
        output: &CoordinateMapKey,
        params: &KernelParams,
    ) -> Self {
        let offsets = match (&params.region_type, &params.offsets) {
            (RegionType::Custom, Some(offsets)) => offsets.to_flat_vec(),
            _ => vec![],
        };
        KernelMapKey::Convolution {
            input: input.clone(),
            output: output.clone(),
            kernel_size: params.kernel_size.clone(),
            kernel_stride: params.kernel_stride.clone(),
            kernel_dilation: params.kernel_dilation.clone(),
            region_type: params.region_type,
            offsets,
            is_transpose: params.is_transpose,
            is_pool: params.is_pool,
        }
    }

    /// Key of the forward map the transposed map with this key can be derived from.
    pub fn forward(&self) -> Option<Self> {
        let mut forward = self.clone();
        match &mut forward {
            KernelMapKey::Convolution {
                input,
                output,
                is_transpose,
                ..
            } if *is_transpose => {
                mem::swap(input, output);
                *is_transpose = false;
            }
            _ => return None,
        }
        Some(forward)
    }
}

impl fmt::Display for KernelMapKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelMapKey::Convolution {
                input,
                output,
                kernel_size,
                kernel_stride,
                kernel_dilation,
                region_type,
                is_transpose,
                is_pool,
                ..
            } => write!(
                formatter,
                "{} -> {} (size {:?}, stride {:?}, dilation {:?}, {:?}{}{})",
                input,
                output,
                kernel_size,
                kernel_stride,
                kernel_dilation,
                region_type,
                if *is_transpose { ", transpose" } else { "" },
                if *is_pool { ", pool" } else { "" }
            ),
            KernelMapKey::Pruning { input, output } => {
                write!(formatter, "{} -> {} (pruning)", input, output)
            }
            KernelMapKey::Union { inputs, output } => {
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        formatter.write_str(" + ")?;
                    }
                    fmt::Display::fmt(input, formatter)?;
                }
                write!(formatter, " -> {} (union)", output)
            }
            KernelMapKey::GlobalReduction { input, output } => {
                write!(formatter, "{} -> {} (global reduction)", input, output)
            }
        }
    }
}

/// Generator of fresh identifiers. Identifiers are unique within a generator
/// thanks to the monotonic counter; the random suffix only makes them harder
/// to guess by accident.
#[derive(Debug, Clone)]
pub(crate) struct IdentifierGenerator {
    rng: XorShiftRng,
    counter: u64,
    suffix_len: usize,
}

impl IdentifierGenerator {
    pub fn new(seed: Option<u64>, suffix_len: usize) -> Self {
        let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
        Self {
            rng: XorShiftRng::seed_from_u64(seed),
            counter: 0,
            suffix_len,
        }
    }

    pub fn generate(&mut self, base: &str) -> String {
        let rng = &mut self.rng;
        let suffix: String = (0..self.suffix_len)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect();
        let identifier = format!("{}_{}{}", base, self.counter, suffix);
        self.counter += 1;
        identifier
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn forward_key_of_transposed_convolution() {
        let fine = CoordinateMapKey::new(vec![1, 1], "");
        let coarse = CoordinateMapKey::new(vec![2, 2], "");
        let params = KernelParams::uniform(2, 3, 2, 1);

        let forward = KernelMapKey::convolution(&fine, &coarse, &params);
        assert_eq!(forward.forward(), None);

        let transposed =
            KernelMapKey::convolution(&coarse, &fine, &params.clone().transposed(true));
        assert_eq!(transposed.forward(), Some(forward));
    }

    #[test]
    fn generated_identifiers_are_unique() {
        let mut generator = IdentifierGenerator::new(Some(42), 4);
        let identifiers: HashSet<_> = (0..1_000).map(|_| generator.generate("pruned")).collect();
        assert_eq!(identifiers.len(), 1_000);
        assert!(identifiers.iter().all(|id| id.starts_with("pruned_")));

        let mut generator = IdentifierGenerator::new(None, 0);
        assert_eq!(generator.generate("x"), "x_0");
        assert_eq!(generator.generate("x"), "x_1");
    }

    #[test]
    fn seeded_generators_are_reproducible() {
        let mut first = IdentifierGenerator::new(Some(7), 8);
        let mut second = IdentifierGenerator::new(Some(7), 8);
        for _ in 0..10 {
            assert_eq!(first.generate("id"), second.generate("id"));
        }
    }

    #[test]
    fn key_display() {
        let key = CoordinateMapKey::new(vec![4, 4, 4], "points");
        assert_eq!(key.to_string(), "[4, 4, 4]/points");
        assert_eq!(key.dimension(), 3);
        assert_eq!(key.identifier(), "points");

        let union = KernelMapKey::Union {
            inputs: vec![key.clone(), CoordinateMapKey::new(vec![4, 4, 4], "")],
            output: CoordinateMapKey::new(vec![4, 4, 4], "u"),
        };
        assert_eq!(
            union.to_string(),
            "[4, 4, 4]/points + [4, 4, 4]/ -> [4, 4, 4]/u (union)"
        );
    }
}
