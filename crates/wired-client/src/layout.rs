use wired_proto::TermSize;

/// Pixel size of one character cell at the current font.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellMetrics {
    pub width: f32,
    pub height: f32,
}

impl Default for CellMetrics {
    /// Roughly a 14px monospace font.
    fn default() -> Self {
        Self {
            width: 8.4,
            height: 17.0,
        }
    }
}

/// Pixel size of the element a terminal renders into.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

impl ContainerSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Largest grid that fits the container, clamped like the server clamps.
pub fn fit(container: ContainerSize, cell: CellMetrics) -> TermSize {
    TermSize::clamped(cells(container.width, cell.width), cells(container.height, cell.height))
}

/// Size of one tile when `count` terminals share the container in grid
/// mode. Tiles are laid out in a near-square grid, filled row by row.
pub fn grid_tile(container: ContainerSize, count: usize) -> ContainerSize {
    if count <= 1 {
        return container;
    }
    let cols = (count as f32).sqrt().ceil();
    let rows = (count as f32 / cols).ceil();
    ContainerSize::new(container.width / cols, container.height / rows)
}

fn cells(pixels: f32, cell: f32) -> i64 {
    if cell <= 0.0 || !pixels.is_finite() {
        return 0;
    }
    (pixels / cell).floor() as i64
}
