use anyhow::{bail, Result};
use image_hasher::{HashAlg, HasherConfig};
use log::warn;
use std::collections::HashMap;
use std::sync::Mutex;

use super::capture::Frame;

#[derive(Debug, Clone)]
pub struct ChangeConfig {
    /// Edge length of a tile in pixels.
    pub tile_size: u32,
    /// Capacity bound on the tile hash map; exceeding it triggers compaction.
    pub max_entries: usize,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            tile_size: 50,
            max_entries: 4096,
        }
    }
}

/// Which tiles changed between the previous frame and this one.
#[derive(Debug, Clone)]
pub struct TileDelta {
    pub changed_tiles: Vec<(u32, u32)>,
    pub total_tiles: usize,
}

impl TileDelta {
    pub fn changed_count(&self) -> usize {
        self.changed_tiles.len()
    }

    pub fn is_unchanged(&self) -> bool {
        self.changed_tiles.is_empty()
    }
}

/// Cheap "did anything visually change" proxy: the frame is split into
/// fixed-size tiles, each tile is fingerprinted, and fingerprints are diffed
/// against the previous generation by tile coordinate.
///
/// Change detection is advisory. Any failure degrades to a coarse
/// whole-frame heuristic instead of failing the cycle.
pub struct ChangeDetector {
    config: ChangeConfig,
    hashes: Mutex<HashMap<(u32, u32), String>>,
}

impl ChangeDetector {
    pub fn new(config: ChangeConfig) -> Self {
        Self {
            config,
            hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn changed_tiles(&self, frame: &Frame) -> TileDelta {
        match self.compute(frame) {
            Ok(delta) => delta,
            Err(err) => {
                warn!("tile hashing failed, using whole-frame heuristic: {err:#}");
                self.fallback(frame)
            }
        }
    }

    pub fn clear(&self) {
        self.lock_hashes().clear();
    }

    fn compute(&self, frame: &Frame) -> Result<TileDelta> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            bail!("frame has zero dimensions");
        }

        let tile = self.config.tile_size;
        let tiles_x = width.div_ceil(tile);
        let tiles_y = height.div_ceil(tile);

        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::DoubleGradient)
            .hash_size(8, 8)
            .to_hasher();

        let mut next = HashMap::with_capacity((tiles_x * tiles_y) as usize);
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let left = tx * tile;
                let top = ty * tile;
                let tile_w = tile.min(width - left);
                let tile_h = tile.min(height - top);

                let hash = if tile_w == 0 || tile_h == 0 {
                    // Degenerate edge tile; mirror the whole-frame fallback
                    // at tile granularity.
                    simple_tile_hash(left, top, width, height)
                } else {
                    let region = frame.image.crop_imm(left, top, tile_w, tile_h);
                    hasher.hash_image(&region).to_base64()
                };

                next.insert((tx, ty), hash);
            }
        }

        let mut previous = self.lock_hashes();
        let mut changed_tiles = Vec::new();
        for (coord, hash) in &next {
            match previous.get(coord) {
                Some(prev) if prev == hash => {}
                _ => changed_tiles.push(*coord),
            }
        }
        changed_tiles.sort_unstable();

        if next.len() > self.config.max_entries {
            compact(&mut next, self.config.max_entries / 2);
        }
        *previous = next;

        Ok(TileDelta {
            changed_tiles,
            total_tiles: (tiles_x * tiles_y) as usize,
        })
    }

    /// Whole-frame heuristic: a single tile keyed by the frame dimensions.
    /// Always reported as changed, so downstream work errs toward running.
    fn fallback(&self, frame: &Frame) -> TileDelta {
        let hash = format!("{}x{}", frame.width(), frame.height());
        let mut previous = self.lock_hashes();
        previous.clear();
        previous.insert((0, 0), hash);

        TileDelta {
            changed_tiles: vec![(0, 0)],
            total_tiles: 1,
        }
    }

    fn lock_hashes(&self) -> std::sync::MutexGuard<'_, HashMap<(u32, u32), String>> {
        self.hashes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(ChangeConfig::default())
    }
}

fn simple_tile_hash(left: u32, top: u32, width: u32, height: u32) -> String {
    (left as u64 + top as u64 + width as u64 + height as u64).to_string()
}

fn compact(map: &mut HashMap<(u32, u32), String>, keep: usize) {
    if map.len() <= keep {
        return;
    }
    let drop = map.len() - keep;
    let victims: Vec<(u32, u32)> = map.keys().take(drop).copied().collect();
    for coord in victims {
        map.remove(&coord);
    }
}
