pub mod classification;
pub mod config;
pub mod db;
pub mod predictor;
pub mod routes;
pub mod storage;
pub mod upload;
