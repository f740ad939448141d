mod auth;
mod handover;
mod helpers;
mod inventory;
mod receipt;
mod settlement;
