pub const DESCRIPTOR_BITS: usize = 256;
pub const DESCRIPTOR_BYTES: usize = DESCRIPTOR_BITS / 8;

/// Fixed-length binary descriptor compared under the Hamming metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub data: [u8; DESCRIPTOR_BYTES],
}

impl Descriptor {
    pub fn new(data: [u8; DESCRIPTOR_BYTES]) -> Self {
        Self { data }
    }

    pub fn zeros() -> Self {
        Self {
            data: [0; DESCRIPTOR_BYTES],
        }
    }

    pub fn size(&self) -> usize {
        DESCRIPTOR_BYTES
    }

    pub fn set_bit(&mut self, bit: usize) {
        self.data[bit / 8] |= 1 << (bit % 8);
    }

    pub fn bit(&self, bit: usize) -> bool {
        self.data[bit / 8] & (1 << (bit % 8)) != 0
    }

    pub fn hamming_distance(&self, other: &Descriptor) -> u32 {
        self.data
            .chunks_exact(8)
            .zip(other.data.chunks_exact(8))
            .map(|(a, b)| {
                let a = u64::from_le_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
                let b = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                (a ^ b).count_ones()
            })
            .sum()
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::zeros()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    pub descriptors: Vec<Descriptor>,
}

impl Descriptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, desc: Descriptor) {
        self.descriptors.push(desc);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Descriptor> {
        self.descriptors.get(index)
    }
}

impl FromIterator<Descriptor> for Descriptors {
    fn from_iter<I: IntoIterator<Item = Descriptor>>(iter: I) -> Self {
        Self {
            descriptors: iter.into_iter().collect(),
        }
    }
}
