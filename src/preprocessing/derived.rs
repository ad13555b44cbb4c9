//! Static features computed from always-available attributes

use crate::data::table::Table;
use crate::error::{PipelineError, Result};
use crate::profile::DerivedFeature;

/// Evaluates derived features in declaration order, so later features may
/// read earlier ones. Returns the names added.
pub fn apply_derived_features(
    source: &str,
    table: &mut Table,
    features: &[DerivedFeature],
) -> Result<Vec<String>> {
    let mut added = Vec::with_capacity(features.len());
    for feature in features {
        let values = evaluate(source, table, feature)?;
        table.set_numeric(feature.name(), values);
        added.push(feature.name().to_string());
    }
    if !added.is_empty() {
        tracing::info!("{}: added {} derived features", source, added.len());
    }
    Ok(added)
}

fn evaluate(source: &str, table: &Table, feature: &DerivedFeature) -> Result<Vec<f64>> {
    let n = table.n_rows();
    let numeric = |column: &str| numeric_input(source, table, feature, column);

    let values = match feature {
        DerivedFeature::Mean { columns, .. } => {
            let inputs = columns.iter().map(|c| numeric(c)).collect::<Result<Vec<_>>>()?;
            (0..n)
                .map(|i| inputs.iter().map(|c| c[i]).sum::<f64>() / inputs.len().max(1) as f64)
                .collect()
        }
        DerivedFeature::AbsDiff { left, right, .. } => {
            let (a, b) = (numeric(left)?, numeric(right)?);
            (0..n).map(|i| (a[i] - b[i]).abs()).collect()
        }
        DerivedFeature::Ratio {
            numerator,
            denominator,
            offset,
            ..
        } => {
            let (a, b) = (numeric(numerator)?, numeric(denominator)?);
            (0..n)
                .map(|i| {
                    let d = b[i] + offset;
                    if d == 0.0 {
                        0.0
                    } else {
                        a[i] / d
                    }
                })
                .collect()
        }
        DerivedFeature::Affine {
            column,
            scale,
            offset,
            ..
        } => numeric(column)?.iter().map(|v| v * scale + offset).collect(),
        DerivedFeature::Matches { column, value, .. } => {
            let cells = table.column(column).ok_or_else(|| {
                PipelineError::schema(
                    source,
                    format!("derived feature {} needs column {:?}", feature.name(), column),
                )
            })?;
            (0..n)
                .map(|i| if cells.key(i).as_deref() == Some(value.as_str()) { 1.0 } else { 0.0 })
                .collect()
        }
        DerivedFeature::Exceeds { column, threshold, .. } => numeric(column)?
            .iter()
            .map(|v| if *v > *threshold { 1.0 } else { 0.0 })
            .collect(),
        DerivedFeature::WeightedSum { terms, bias, .. } => {
            let inputs = terms
                .iter()
                .map(|t| Ok((numeric(&t.column)?, t.weight)))
                .collect::<Result<Vec<_>>>()?;
            (0..n)
                .map(|i| bias + inputs.iter().map(|(c, w)| c[i] * w).sum::<f64>())
                .collect()
        }
    };
    Ok(values)
}

fn numeric_input<'t>(
    source: &str,
    table: &'t Table,
    feature: &DerivedFeature,
    column: &str,
) -> Result<&'t [f64]> {
    table.numeric(column).ok_or_else(|| {
        PipelineError::schema(
            source,
            format!("derived feature {} needs numeric column {:?}", feature.name(), column),
        )
    })
}
