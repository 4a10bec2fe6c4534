pub mod irail;
