use chrono::Utc;
use engine_integration::{EngineError, LabelingEngine, LocalAnnotationId};
use serde_json::Value;
use shared::protocol::AnnotationPayload;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Attach the server key so the gateway treats the write as an update.
    pub include_id: bool,
    /// Send the raw draft version instead of re-serializing the annotation.
    pub draft: bool,
}

impl SerializeOptions {
    pub fn with_id() -> Self {
        Self {
            include_id: true,
            draft: false,
        }
    }

    pub fn draft() -> Self {
        Self {
            include_id: false,
            draft: true,
        }
    }
}

/// Builds the transport payload for one engine annotation.
pub fn prepare_data<E>(
    engine: &E,
    id: &LocalAnnotationId,
    options: SerializeOptions,
) -> Result<AnnotationPayload, EngineError>
where
    E: LabelingEngine + ?Sized,
{
    let annotation = engine
        .annotation(id)
        .ok_or_else(|| EngineError::UnknownAnnotation(id.clone()))?;

    let elapsed = Utc::now() - annotation.loaded_at;
    let lead_time = elapsed.num_milliseconds() as f64 / 1000.0;

    let result = if options.draft {
        annotation
            .draft_version
            .clone()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    } else {
        engine.serialize_annotation(id)?
    };

    let key = if options.include_id && annotation.is_persisted() {
        annotation.pk
    } else {
        None
    };

    Ok(AnnotationPayload {
        id: key,
        lead_time: Some(lead_time),
        result,
        draft_id: annotation.draft_id,
        parent_prediction: annotation.parent_prediction,
        parent_annotation: annotation.parent_annotation,
        was_cancelled: false,
    })
}
