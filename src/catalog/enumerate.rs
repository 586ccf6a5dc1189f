use tracing::debug;

use super::{CatalogHandle, RenditionDescriptor};

/// Filtering applied while enumerating renditions
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumerateOptions {
    /// Skip the atlases packed assets are bundled into
    pub ignore_packed_assets: bool,

    /// Stop once this many descriptors have been accepted
    pub max_accepted: Option<usize>,
}

/// Lazy pass over a catalog's image renditions, in storage order
///
/// Renditions that are not images, or whose header cannot be read, are
/// skipped and do not count towards [`EnumerateOptions::max_accepted`].
pub struct Renditions<'a> {
    handle: &'a CatalogHandle,
    options: EnumerateOptions,
    next_entry: usize,
    accepted: usize,
}

impl<'a> Renditions<'a> {
    pub(super) fn new(handle: &'a CatalogHandle, options: EnumerateOptions) -> Self {
        Self {
            handle,
            options,
            next_entry: 0,
            accepted: 0,
        }
    }

    /// Number of descriptors yielded so far
    pub fn accepted(&self) -> usize {
        self.accepted
    }
}

impl Iterator for Renditions<'_> {
    type Item = RenditionDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self
                .options
                .max_accepted
                .is_some_and(|max| self.accepted >= max)
            {
                return None;
            }

            if self.next_entry >= self.handle.rendition_count() {
                return None;
            }

            let entry = self.next_entry;
            self.next_entry += 1;

            let desc = match self.handle.describe(entry) {
                Ok(Some(desc)) => desc,
                Ok(None) => continue,
                Err(err) => {
                    debug!(entry, %err, "skipping unreadable rendition");
                    continue;
                }
            };

            if self.options.ignore_packed_assets && desc.packed {
                debug!(name = %desc.name, "skipping packed asset");
                continue;
            }

            self.accepted += 1;
            return Some(desc);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.handle.rendition_count() - self.next_entry;
        let remaining = match self.options.max_accepted {
            Some(max) => remaining.min(max.saturating_sub(self.accepted)),
            None => remaining,
        };

        (0, Some(remaining))
    }
}
