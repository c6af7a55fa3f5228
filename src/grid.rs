use geo::{coord, Rect};

use crate::{
    area::Area,
    error::{Error, Result},
    overlay::Cell,
};

/// Tiles the envelope of `boundary` with `side` metre squares.
///
/// Columns start at `floor(xmin)` and rows at `floor(ymin)`, stepping until
/// `ceil(xmax)` / `ceil(ymax)` is reached, so the envelope is always covered.
/// Cells are emitted column by column, top row first.
///
/// Each cell covers `[y, y + side]` upward from its row origin. This
/// deliberately differs from the older gridding scripts, which drew every
/// cell downward to `y - side` and so left the top strip of the boundary
/// uncovered.
pub fn grid_area(boundary: &Area, side: f64) -> Result<Vec<Cell>> {
    if side <= 0.0 || !side.is_finite() {
        return Err(Error::Geometry(format!("grid side must be positive, got {}", side)));
    }
    let Some(envelope) = boundary.envelope() else {
        return Ok(Vec::new());
    };

    let x0 = envelope.min().x.floor();
    let y0 = envelope.min().y.floor();
    let n_cols = steps(x0, envelope.max().x.ceil(), side);
    let n_rows = steps(y0, envelope.max().y.ceil(), side);

    let mut cells = Vec::with_capacity(n_cols * n_rows);
    for i in 0..n_cols {
        let x = x0 + i as f64 * side;
        for j in (0..n_rows).rev() {
            let y = y0 + j as f64 * side;
            let square = Rect::new(coord! { x: x, y: y }, coord! { x: x + side, y: y + side });
            cells.push(Cell::new(cells.len(), square.to_polygon()));
        }
    }

    Ok(cells)
}

/// Number of `side` steps from `start` while staying below `end`.
fn steps(start: f64, end: f64, side: f64) -> usize {
    if end <= start {
        // Degenerate extent still gets one row or column.
        return 1;
    }
    ((end - start) / side).ceil() as usize
}
