use devreg_core::Keypoint;

/// Keypoint with corner response score for NMS
#[derive(Debug, Clone, Copy)]
pub struct ScoredKeypoint {
    pub keypoint: Keypoint,
    pub response: f32,
}

/// Scale information for pyramid levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleLevel {
    pub level: usize,
    pub scale: f32,
    pub width: usize,
    pub height: usize,
    /// Share of the feature budget assigned to this level
    pub budget: usize,
}

/// Segment-test classification of one circle pixel against the centre
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum CornerType {
    Bright,
    Dark,
    None,
}
