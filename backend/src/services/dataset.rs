//! Training-set export

use std::io::Write;

use crate::error::AppResult;
use crate::models::{FeatureVocabulary, TARGET_COLUMN};
use crate::services::features::TrainingRow;

/// Write training rows as CSV: id, canonical features, label
///
/// Missing feature values are written as empty cells. Returns the number of
/// data rows written.
pub fn write_training_csv<W: Write>(rows: &[TrainingRow], writer: W) -> AppResult<usize> {
    let vocabulary = FeatureVocabulary::canonical();
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(vocabulary.len() + 2);
    header.push("crop_cycle_id".to_string());
    header.extend(vocabulary.names().iter().cloned());
    header.push(TARGET_COLUMN.to_string());
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.crop_cycle_id().to_string());
        for (_, value) in row.features.to_vector(&vocabulary).values {
            record.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        record.push(row.target.to_string());
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(rows.len())
}

/// Training rows rendered as a CSV string
pub fn export_to_csv(rows: &[TrainingRow]) -> AppResult<String> {
    let mut buffer = Vec::new();
    write_training_csv(rows, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| crate::error::AppError::Internal(format!("UTF-8 conversion error: {}", e)))
}
