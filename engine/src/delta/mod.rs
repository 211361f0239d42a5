//! C4 and C5: the two delta detectors. Each observes one backend and
//! reports what the *other* backend doesn't have yet.

pub mod versioned_to_vector;
pub mod vector_to_versioned;
