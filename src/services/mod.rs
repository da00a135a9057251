pub mod cards;
pub mod due_cards;
pub mod review;
pub mod session;
pub mod stats;
