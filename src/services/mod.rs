// Order subsystem services
pub mod history;
pub mod orders;
pub mod shipment_check;
pub mod transitions;
