use tracing::warn;

use crate::image::{Image, RawImage};
use crate::CoreError;

/// An input buffer that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedImage {
    pub index: usize,
    pub error: CoreError,
}

/// Owns every valid input image for the duration of one pipeline run.
///
/// Images keep their input position as index; lookups are by that index so
/// rejected buffers leave gaps rather than renumbering the survivors.
#[derive(Debug, Default)]
pub struct ImageStore {
    images: Vec<Image>,
    rejected: Vec<RejectedImage>,
    input_count: usize,
}

impl ImageStore {
    /// Validates and converts every buffer. Invalid buffers are recorded, never fatal.
    pub fn ingest(buffers: Vec<RawImage>) -> Self {
        let input_count = buffers.len();
        let mut images = Vec::with_capacity(input_count);
        let mut rejected = Vec::new();

        for (index, raw) in buffers.into_iter().enumerate() {
            match Image::new(index, raw) {
                Ok(image) => images.push(image),
                Err(error) => {
                    warn!(index, %error, "rejecting input image");
                    rejected.push(RejectedImage { index, error });
                }
            }
        }

        Self {
            images,
            rejected,
            input_count,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Image> {
        self.images
            .binary_search_by_key(&index, |img| img.index())
            .ok()
            .map(|pos| &self.images[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn indices(&self) -> Vec<usize> {
        self.images.iter().map(|img| img.index()).collect()
    }

    pub fn rejected(&self) -> &[RejectedImage] {
        &self.rejected
    }

    /// Number of valid images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Number of buffers handed to [`ImageStore::ingest`], valid or not.
    pub fn input_count(&self) -> usize {
        self.input_count
    }
}
