//! Session modes and the annotation-selection policy each one implies.

use engine_integration::{EngineAnnotation, LocalAnnotationId};
use serde::{Deserialize, Serialize};
use shared::{domain::AnnotationId, protocol::Prediction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    Explorer,
    LabelStream,
}

/// Fixed for the lifetime of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMode {
    pub kind: ModeKind,
    pub review: bool,
}

impl SessionMode {
    pub fn explorer() -> Self {
        Self {
            kind: ModeKind::Explorer,
            review: false,
        }
    }

    pub fn label_stream() -> Self {
        Self {
            kind: ModeKind::LabelStream,
            review: false,
        }
    }

    pub fn stream_review() -> Self {
        Self {
            kind: ModeKind::LabelStream,
            review: true,
        }
    }

    pub fn with_review(mut self, review: bool) -> Self {
        self.review = review;
        self
    }

    pub fn is_label_stream(self) -> bool {
        self.kind == ModeKind::LabelStream
    }

    /// Reviewers never see unsubmitted drafts.
    pub fn applies_drafts(self) -> bool {
        !self.review
    }

    pub fn selection_policy(self) -> SelectionPolicy {
        match (self.kind, self.review) {
            (ModeKind::Explorer, _) => SelectionPolicy::Explorer,
            (ModeKind::LabelStream, false) => SelectionPolicy::StreamLabeling,
            (ModeKind::LabelStream, true) => SelectionPolicy::StreamReview,
        }
    }

    pub fn navigation(self) -> NavigationPolicy {
        match self.kind {
            ModeKind::Explorer => NavigationPolicy::ReloadCurrent,
            ModeKind::LabelStream => NavigationPolicy::AdvanceStream,
        }
    }
}

/// Where the session goes after a completed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationPolicy {
    ReloadCurrent,
    AdvanceStream,
}

/// Annotation requested by the host or by navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationRef {
    /// Let the policy pick ("auto").
    Auto,
    Pk(AnnotationId),
}

impl AnnotationRef {
    fn is_specific(&self) -> bool {
        !matches!(self, Self::Auto)
    }

    fn matches(&self, annotation: &EngineAnnotation) -> bool {
        match self {
            Self::Auto => false,
            Self::Pk(pk) => annotation.pk == Some(*pk) || annotation.id.0 == pk.to_string(),
        }
    }
}

pub struct SelectionContext<'a> {
    /// Engine annotations, newest first.
    pub annotations: &'a [EngineAnnotation],
    pub predictions: &'a [Prediction],
    pub requested: Option<&'a AnnotationRef>,
    pub from_history: bool,
    pub show_collab_predictions: bool,
    pub interactive_preannotations: bool,
}

impl SelectionContext<'_> {
    fn first(&self) -> Option<&EngineAnnotation> {
        self.annotations.first()
    }

    fn find_requested(&self) -> SelectionDecision {
        let found = self
            .requested
            .and_then(|requested| self.annotations.iter().find(|a| requested.matches(a)));
        match found {
            Some(annotation) => SelectionDecision::Existing(annotation.id.clone()),
            None => SelectionDecision::Nothing,
        }
    }

    fn specific_from_history(&self) -> bool {
        self.from_history && self.requested.is_some_and(AnnotationRef::is_specific)
    }

    /// First annotation was created here and never saved.
    fn has_auto_annotations(&self) -> bool {
        self.first()
            .is_some_and(|first| first.pk.is_none() || first.is_unsent())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionDecision {
    Existing(LocalAnnotationId),
    FromTopPrediction,
    NewEmpty,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Explorer,
    StreamLabeling,
    StreamReview,
}

impl SelectionPolicy {
    pub fn choose(self, ctx: &SelectionContext<'_>) -> SelectionDecision {
        match self {
            Self::StreamReview => {
                if ctx.specific_from_history() {
                    ctx.find_requested()
                } else if let Some(first) = ctx.first() {
                    SelectionDecision::Existing(first.id.clone())
                } else {
                    SelectionDecision::Nothing
                }
            }
            Self::StreamLabeling => {
                if let Some(first) = ctx.first().filter(|first| first.draft_id.is_some()) {
                    // unsubmitted draft from an interrupted session
                    SelectionDecision::Existing(first.id.clone())
                } else if ctx.specific_from_history() {
                    ctx.find_requested()
                } else if ctx.show_collab_predictions
                    && !ctx.predictions.is_empty()
                    && !ctx.interactive_preannotations
                {
                    SelectionDecision::FromTopPrediction
                } else {
                    SelectionDecision::NewEmpty
                }
            }
            Self::Explorer => {
                let has_annotations = !ctx.annotations.is_empty();
                let auto = matches!(ctx.requested, Some(AnnotationRef::Auto));
                if !has_annotations
                    && !ctx.predictions.is_empty()
                    && !ctx.interactive_preannotations
                {
                    SelectionDecision::FromTopPrediction
                } else if has_annotations && ctx.requested.is_some_and(AnnotationRef::is_specific)
                {
                    ctx.find_requested()
                } else if has_annotations && (auto || ctx.has_auto_annotations()) {
                    ctx.first()
                        .map(|first| SelectionDecision::Existing(first.id.clone()))
                        .unwrap_or(SelectionDecision::Nothing)
                } else {
                    SelectionDecision::NewEmpty
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use shared::domain::{DraftId, PredictionId};

    use super::*;

    fn persisted(pk: i64) -> EngineAnnotation {
        EngineAnnotation {
            id: LocalAnnotationId(pk.to_string()),
            pk: Some(AnnotationId(pk)),
            user_generate: false,
            sent_user_generate: false,
            draft_id: None,
            parent_prediction: None,
            parent_annotation: None,
            ground_truth: false,
            was_cancelled: false,
            created_by: None,
            created_ago: None,
            created_date: None,
            loaded_at: Utc::now(),
            result: json!([]),
            draft_version: None,
            history_frozen: false,
        }
    }

    fn unsent(local: &str) -> EngineAnnotation {
        EngineAnnotation {
            id: LocalAnnotationId(local.to_string()),
            pk: None,
            user_generate: true,
            ..persisted(0)
        }
    }

    fn prediction() -> Prediction {
        Prediction {
            id: PredictionId(1),
            result: json!([]),
            score: None,
            model_version: None,
        }
    }

    fn ctx<'a>(
        annotations: &'a [EngineAnnotation],
        predictions: &'a [Prediction],
        requested: Option<&'a AnnotationRef>,
        from_history: bool,
    ) -> SelectionContext<'a> {
        SelectionContext {
            annotations,
            predictions,
            requested,
            from_history,
            show_collab_predictions: true,
            interactive_preannotations: false,
        }
    }

    #[test]
    fn mode_maps_to_policies() {
        assert_eq!(
            SessionMode::explorer().selection_policy(),
            SelectionPolicy::Explorer
        );
        assert_eq!(
            SessionMode::explorer().with_review(true).selection_policy(),
            SelectionPolicy::Explorer
        );
        assert_eq!(
            SessionMode::label_stream().selection_policy(),
            SelectionPolicy::StreamLabeling
        );
        assert_eq!(
            SessionMode::stream_review().selection_policy(),
            SelectionPolicy::StreamReview
        );
        assert_eq!(
            SessionMode::explorer().navigation(),
            NavigationPolicy::ReloadCurrent
        );
        assert_eq!(
            SessionMode::stream_review().navigation(),
            NavigationPolicy::AdvanceStream
        );
        assert!(!SessionMode::stream_review().applies_drafts());
    }

    #[test]
    fn stream_review_never_fabricates_annotations() {
        let predictions = [prediction()];
        let decision = SelectionPolicy::StreamReview.choose(&ctx(&[], &predictions, None, false));
        assert_eq!(decision, SelectionDecision::Nothing);
    }

    #[test]
    fn stream_review_uses_history_request_only_when_navigating_history() {
        let annotations = [persisted(2), persisted(1)];
        let requested = AnnotationRef::Pk(AnnotationId(1));

        let decision =
            SelectionPolicy::StreamReview.choose(&ctx(&annotations, &[], Some(&requested), true));
        assert_eq!(
            decision,
            SelectionDecision::Existing(LocalAnnotationId("1".into()))
        );

        let decision =
            SelectionPolicy::StreamReview.choose(&ctx(&annotations, &[], Some(&requested), false));
        assert_eq!(
            decision,
            SelectionDecision::Existing(LocalAnnotationId("2".into()))
        );
    }

    #[test]
    fn stream_labeling_resumes_draft_before_anything_else() {
        let mut first = persisted(3);
        first.draft_id = Some(DraftId(7));
        let annotations = [first, persisted(1)];
        let requested = AnnotationRef::Pk(AnnotationId(1));
        let predictions = [prediction()];

        let decision = SelectionPolicy::StreamLabeling.choose(&ctx(
            &annotations,
            &predictions,
            Some(&requested),
            true,
        ));
        assert_eq!(
            decision,
            SelectionDecision::Existing(LocalAnnotationId("3".into()))
        );
    }

    #[test]
    fn stream_labeling_promotes_prediction_only_when_collab_enabled() {
        let predictions = [prediction()];
        let mut context = ctx(&[], &predictions, None, false);
        assert_eq!(
            SelectionPolicy::StreamLabeling.choose(&context),
            SelectionDecision::FromTopPrediction
        );

        context.show_collab_predictions = false;
        assert_eq!(
            SelectionPolicy::StreamLabeling.choose(&context),
            SelectionDecision::NewEmpty
        );

        context.show_collab_predictions = true;
        context.interactive_preannotations = true;
        assert_eq!(
            SelectionPolicy::StreamLabeling.choose(&context),
            SelectionDecision::NewEmpty
        );
    }

    #[test]
    fn explorer_promotes_prediction_when_task_has_no_annotations() {
        let predictions = [prediction()];
        let mut context = ctx(&[], &predictions, Some(&AnnotationRef::Auto), false);
        context.show_collab_predictions = false;
        assert_eq!(
            SelectionPolicy::Explorer.choose(&context),
            SelectionDecision::FromTopPrediction
        );
    }

    #[test]
    fn explorer_picks_requested_then_auto_then_new() {
        let annotations = [persisted(5), persisted(4)];
        let requested = AnnotationRef::Pk(AnnotationId(4));
        assert_eq!(
            SelectionPolicy::Explorer.choose(&ctx(&annotations, &[], Some(&requested), false)),
            SelectionDecision::Existing(LocalAnnotationId("4".into()))
        );

        let missing = AnnotationRef::Pk(AnnotationId(99));
        assert_eq!(
            SelectionPolicy::Explorer.choose(&ctx(&annotations, &[], Some(&missing), false)),
            SelectionDecision::Nothing
        );

        assert_eq!(
            SelectionPolicy::Explorer.choose(&ctx(
                &annotations,
                &[],
                Some(&AnnotationRef::Auto),
                false
            )),
            SelectionDecision::Existing(LocalAnnotationId("5".into()))
        );

        assert_eq!(
            SelectionPolicy::Explorer.choose(&ctx(&annotations, &[], None, false)),
            SelectionDecision::NewEmpty
        );
        assert_eq!(
            SelectionPolicy::Explorer.choose(&ctx(&[], &[], None, false)),
            SelectionDecision::NewEmpty
        );
    }

    #[test]
    fn explorer_reuses_unsent_annotation_instead_of_creating_another() {
        let annotations = [unsent("local-1"), persisted(4)];
        assert_eq!(
            SelectionPolicy::Explorer.choose(&ctx(&annotations, &[], None, false)),
            SelectionDecision::Existing(LocalAnnotationId("local-1".into()))
        );
    }
}
