// Adapters implementing the application ports against real services

pub mod http_client;
pub mod lastfm;
pub mod openweather;
pub mod soundcharts;
