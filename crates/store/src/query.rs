use domain::ReservationStatus;

/// Default page size for reservation listings.
pub const DEFAULT_LIMIT: usize = 50;

/// Upper bound on a single page.
pub const MAX_LIMIT: usize = 500;

/// Builder for constructing reservation listings.
///
/// Results are ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct ReservationQuery {
    /// Filter by status.
    pub status: Option<ReservationStatus>,

    /// Maximum number of reservations to return.
    pub limit: Option<usize>,

    /// Number of reservations to skip.
    pub offset: Option<usize>,
}

impl ReservationQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for reservations in a specific status.
    pub fn for_status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Filters by status.
    pub fn status(mut self, status: ReservationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Limits the number of reservations returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many reservations before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Page size after applying the default and the upper bound.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}
