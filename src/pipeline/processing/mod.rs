// Pipeline processing: extraction, feature derivation, loading and enrichment

pub mod enrich;
pub mod extract;
pub mod features;
pub mod load;
pub mod transform;
