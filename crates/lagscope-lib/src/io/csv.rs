#[cfg(feature = "polars")]
pub mod polars_io {
    use crate::{io::unit::ColumnLayout, signal::SeriesPair};
    use anyhow::{Context, Result};
    use polars::prelude::*;
    use std::path::Path;

    /// Load a unit table through polars; nulls become `NaN`.
    pub fn load_unit(path: &Path, layout: &ColumnLayout) -> Result<SeriesPair> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()
            .with_context(|| format!("reading {}", path.display()))?;
        let time = load_column(&df, &layout.time)?;
        if let Some(row) = time.iter().position(|t| t.is_nan()) {
            anyhow::bail!("{}: time missing on row {}", path.display(), row + 1);
        }
        let dilation = load_column(&df, &layout.dilation)?;
        let activity = load_column(&df, &layout.activity)?;
        Ok(SeriesPair::new(time, dilation, activity)?)
    }

    fn load_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
        let series = df
            .get_columns()
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow::anyhow!("missing column ({})", name))?;
        let values = series.cast(&DataType::Float64)?;
        Ok(values
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }
}
