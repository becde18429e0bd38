//! Dataset naming convention: for feature set `NAME`, the batch
//! dataset is `UPPER(sanitize(NAME)) + "_BATCH"` and the streaming dataset is
//! `UPPER(sanitize(NAME)) + "_STREAMING"`.

/// Replace anything that isn't ASCII alphanumeric with `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn batch_dataset(feature_set_name: &str) -> String {
    format!("{}_BATCH", sanitize(feature_set_name).to_uppercase())
}

pub fn streaming_dataset(feature_set_name: &str) -> String {
    format!("{}_STREAMING", sanitize(feature_set_name).to_uppercase())
}
