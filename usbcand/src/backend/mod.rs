pub mod socketcan;
