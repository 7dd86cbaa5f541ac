/// A recently useful fact, ranked for display by hit count then recency.
#[derive(Debug, Clone, PartialEq)]
pub struct HotFact {
    pub id: i64,
    pub text: String,
    pub inserted_at: String,
    pub last_accessed_at: String,
    pub hit_count: u32,
}

/// One cold-store match, ranked by ascending embedding distance.
#[derive(Debug, Clone, PartialEq)]
pub struct ColdHit {
    pub text: String,
    pub distance: f64,
    pub archived_at: String,
}
