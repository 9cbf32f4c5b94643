//! Chain-level constants: quote mints and AMM program identifiers.

/// USDC mint on Solana mainnet
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Wrapped SOL mint
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Raydium AMM v4 program
pub const RAYDIUM_AMM_PROGRAM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// Orca Whirlpool program
pub const ORCA_WHIRLPOOL_PROGRAM: &str = "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc";

/// Programs whose logs the ingestor subscribes to
pub const WATCHED_PROGRAMS: [&str; 2] = [RAYDIUM_AMM_PROGRAM, ORCA_WHIRLPOOL_PROGRAM];

/// Returns true for stable/bridge mints used as the quote leg of a swap
pub fn is_quote_mint(mint: &str) -> bool {
    mint == USDC_MINT || mint == WSOL_MINT
}

/// Validate a mint address: base58 text decoding to exactly 32 bytes.
///
/// Placeholder sentinels sometimes stored by older catalog revisions
/// (empty string, "none") fail this check, which is what callers rely on.
pub fn is_valid_mint(mint: &str) -> bool {
    match bs58::decode(mint).into_vec() {
        Ok(bytes) => bytes.len() == 32,
        Err(_) => false,
    }
}
