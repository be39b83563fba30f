//! Wire types exchanged with the `/api/auth` endpoints.

pub mod token;

pub use token::{
    GoogleLoginRequest, LoginRequest, MessageResponse, RefreshTokenRequest, SignupRequest,
    SignupResponse, TokenPair,
};
