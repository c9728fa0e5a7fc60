mod logistic;

pub use logistic::*;
