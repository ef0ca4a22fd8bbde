use rand::Rng;

/// Formats a balance held in minor units, e.g. `-1250` with two decimals as `-12.50`.
pub fn format_balance(balance: i64, decimals: u32) -> String {
	if decimals == 0 {
		return balance.to_string();
	}
	let scale = 10i128.pow(decimals);
	let value = balance as i128;
	let sign = if value < 0 { "-" } else { "" };
	let abs = value.abs();
	format!(
		"{}{}.{:0width$}",
		sign,
		abs / scale,
		abs % scale,
		width = decimals as usize
	)
}

/// Random identifier for this installation, used as the prefix of every operation id.
pub fn generate_device_id() -> String {
	let mut id = [0u8; 8];
	rand::rng().fill(&mut id);
	hex::encode(id)
}
