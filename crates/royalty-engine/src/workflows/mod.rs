pub mod royalty;
