// Tests module
// Registry invariants: ordering, uniqueness, atomic failure, concurrency, persistence
// API integration: full request path through the router and the facade

pub mod api_integration;
