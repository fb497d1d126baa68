pub mod lag;
pub mod response;
pub mod xcorr;

pub use lag::{
    aggregate, aggregate_by_condition, aggregate_records, coerce_lag, ApprovalList, LagSummary,
};
pub use response::{
    average_responses, average_snippets, AveragedResponse, Grouping, ResponseGroup, ResponseRow,
};
pub use xcorr::{
    average_correlations, cross_correlate, segment_correlations, CorrelationSegment,
    CrossCorrelation, SegmentCorrelation,
};
