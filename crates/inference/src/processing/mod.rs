pub mod heatmap;
pub mod post;
