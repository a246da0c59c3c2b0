/// Selectable conference layout. Exhaustively matched, never
/// emulated via an inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// sqrt(N) x sqrt(N) tiles, size-balanced.
    Grid,
    /// One active participant fills ~75%; others strip along an edge.
    OneBig,
    /// Only the active speaker is shown.
    Hidden,
}

/// A tile's placement within the composed output frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Layout {
    /// Computes tile placement for `n` sources at `output` resolution, with
    /// `active_idx` (if any) naming the pinned/auto-selected active stream
    /// for `OneBig`/`Hidden`.
    pub fn compute_tiles(
        self,
        n: usize,
        active_idx: Option<usize>,
        output_width: u32,
        output_height: u32,
    ) -> Vec<TileRect> {
        if n == 0 {
            return Vec::new();
        }
        match self {
            Layout::Grid => grid_tiles(n, output_width, output_height),
            Layout::Hidden => {
                let idx = active_idx.unwrap_or(0);
                (0..n)
                    .map(|i| {
                        if i == idx {
                            TileRect { x: 0, y: 0, width: output_width, height: output_height }
                        } else {
                            TileRect { x: 0, y: 0, width: 0, height: 0 }
                        }
                    })
                    .collect()
            }
            Layout::OneBig => one_big_tiles(n, active_idx.unwrap_or(0), output_width, output_height),
        }
    }
}

fn grid_tiles(n: usize, output_width: u32, output_height: u32) -> Vec<TileRect> {
    let cols = (n as f64).sqrt().ceil() as u32;
    let rows = (n as u32).div_ceil(cols.max(1));
    let tile_w = output_width / cols.max(1);
    let tile_h = output_height / rows.max(1);
    (0..n)
        .map(|i| {
            let col = (i as u32) % cols.max(1);
            let row = (i as u32) / cols.max(1);
            TileRect { x: col * tile_w, y: row * tile_h, width: tile_w, height: tile_h }
        })
        .collect()
}

fn one_big_tiles(n: usize, active_idx: usize, output_width: u32, output_height: u32) -> Vec<TileRect> {
    let big_height = (output_height as f64 * 0.75) as u32;
    let strip_height = output_height - big_height;
    let others = n.saturating_sub(1).max(1);
    let strip_tile_w = output_width / others as u32;

    let mut tiles = Vec::with_capacity(n);
    let mut strip_slot = 0u32;
    for i in 0..n {
        if i == active_idx {
            tiles.push(TileRect { x: 0, y: 0, width: output_width, height: big_height });
        } else {
            tiles.push(TileRect {
                x: strip_slot * strip_tile_w,
                y: big_height,
                width: strip_tile_w,
                height: strip_height,
            });
            strip_slot += 1;
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_four_sources_is_two_by_two() {
        let tiles = Layout::Grid.compute_tiles(4, None, 1280, 720);
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[0].width, 640);
        assert_eq!(tiles[0].height, 360);
    }

    #[test]
    fn hidden_shows_only_active_tile() {
        let tiles = Layout::Hidden.compute_tiles(3, Some(1), 1280, 720);
        assert_eq!(tiles[1].width, 1280);
        assert_eq!(tiles[0].width, 0);
        assert_eq!(tiles[2].width, 0);
    }

    #[test]
    fn one_big_gives_active_tile_majority_of_area() {
        let tiles = Layout::OneBig.compute_tiles(3, Some(0), 1280, 720);
        assert_eq!(tiles[0].height, 540); // 0.75 * 720
        assert!(tiles[1].y == 540 && tiles[2].y == 540);
    }
}
