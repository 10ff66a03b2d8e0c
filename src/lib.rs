pub mod background;
pub mod clustering;
pub mod config;
pub mod errors;
pub mod events;
pub mod fusion;
pub mod geometry;
pub mod hokuyo;
pub mod pipeline;
pub mod scan;
pub mod screens;
pub mod tracker;
pub mod tuio;

pub type Point2D = (f32, f32);
