//! Map headers and plane decoding

use idcache_formats::MapHeader;
use idcache_formats::map::{MAP_HEADER_SIZE, decode_plane};
use std::io::{Read, Seek};
use tracing::{debug, info};

use super::AssetCache;
use crate::io::read_exact_at;
use crate::{Result, StorageError};

impl<R: Read + Seek> AssetCache<R> {
    pub(super) fn load_map_headers(&mut self) -> Result<()> {
        let mut headers = Vec::with_capacity(self.config.num_maps);
        for map in 0..self.config.num_maps {
            let Some(offset) = self.directory.map_head.header_offset(map) else {
                headers.push(None);
                continue;
            };
            let mut record = [0u8; MAP_HEADER_SIZE];
            read_exact_at(&mut self.files.maps, offset.into(), &mut record)?;
            headers.push(Some(MapHeader::from_bytes(&record)?));
        }
        debug!(
            "Read {} map headers",
            headers.iter().filter(|h| h.is_some()).count()
        );
        self.map_headers = headers;
        Ok(())
    }

    /// Decode the configured planes of a map and make it current.
    pub fn cache_map(&mut self, map: usize) -> Result<()> {
        let count = self.map_headers.len();
        let header = self
            .map_headers
            .get(map)
            .ok_or(StorageError::OutOfRange {
                namespace: "map",
                id: map,
                count,
            })?
            .as_ref()
            .ok_or(StorageError::Sparse {
                namespace: "map",
                id: map,
            })?;

        let rlew_tag = self.directory.map_head.rlew_tag;
        let mut planes = Vec::with_capacity(self.config.map_planes);
        for plane in 0..self.config.map_planes {
            let (start, length) = header.plane(plane)?;
            let decoded = if length <= self.scratch.len() {
                read_exact_at(&mut self.files.maps, start.into(), &mut self.scratch[..length])?;
                decode_plane(&self.scratch[..length], rlew_tag)?
            } else {
                let mut temp = vec![0u8; length];
                read_exact_at(&mut self.files.maps, start.into(), &mut temp)?;
                decode_plane(&temp, rlew_tag)?
            };
            planes.push(decoded);
        }

        info!("Cached map {} ({})", map, header.name());
        self.planes = planes;
        self.current_map = Some(map);
        Ok(())
    }

    /// Decoded plane of the current map.
    pub fn map_plane(&self, plane: usize) -> Option<&[u16]> {
        self.planes.get(plane).map(Vec::as_slice)
    }

    /// Map whose planes are loaded.
    pub const fn current_map(&self) -> Option<usize> {
        self.current_map
    }

    /// Header of a map, `None` when sparse or out of range.
    pub fn map_header(&self, map: usize) -> Option<&MapHeader> {
        self.map_headers.get(map)?.as_ref()
    }
}
