//! Line-based cashier console on stdin.

use kasse_sync::cashier::{CashierReceipt, CashierSession};
use kasse_sync::connectivity::{ConnectivityMonitor, SignalSender, TransportSignal};
use kasse_sync::ledger::{AccountId, Ledger, OperationId};
use kasse_sync::sync::SyncScheduler;
use kasse_sync::utils::format_balance;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const DECIMALS: u32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("Unknown command {0:?}, try `help`")]
	UnknownCommand(String),

	#[error("Usage: {0}")]
	Usage(&'static str),

	#[error("Invalid amount {0:?}")]
	InvalidAmount(String),

	#[error("Invalid operation id {0:?}")]
	InvalidOperationId(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Member { id: AccountId, name: String },
	Deposit { account: AccountId, amount: u64 },
	Pay { account: AccountId, amount: u64 },
	Transfer { from: AccountId, to: AccountId, amount: u64 },
	Balances,
	Conflicts,
	Acknowledge(OperationId),
	Retry(OperationId),
	Sync,
	Online,
	Offline,
	Compact,
	Status,
	Help,
	Quit,
}

const HELP: &str = "\
member <id> <name>          register a member
deposit <id> <amount>       top up a prepaid balance
pay <id> <amount>           settle a tab
transfer <from> <to> <amt>  move a tab to another member
balances                    show all balances
conflicts                   list rejected actions
ack <op-id>                 discard a rejected action
retry <op-id>               re-issue a rejected action
sync                        reconcile now
online | offline            report a transport change
compact                     fold old synced operations
status                      connectivity and pending count
quit";

/// Parses `12`, `12.5` or `12.50` into minor units.
fn parse_amount(raw: &str) -> Result<u64, ParseError> {
	let invalid = || ParseError::InvalidAmount(raw.to_string());
	let scale = 10u64.pow(DECIMALS);

	let (whole, fraction) = match raw.split_once('.') {
		Some((whole, fraction)) => (whole, fraction),
		None => (raw, ""),
	};
	if whole.is_empty() || fraction.len() > DECIMALS as usize {
		return Err(invalid());
	}
	if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
		return Err(invalid());
	}

	let whole: u64 = whole.parse().map_err(|_| invalid())?;
	let fraction: u64 = if fraction.is_empty() {
		0
	} else {
		let padded = format!("{:0<width$}", fraction, width = DECIMALS as usize);
		padded.parse().map_err(|_| invalid())?
	};

	whole
		.checked_mul(scale)
		.and_then(|v| v.checked_add(fraction))
		.ok_or_else(invalid)
}

fn parse_id(raw: &str) -> Result<OperationId, ParseError> {
	raw.parse()
		.map_err(|_| ParseError::InvalidOperationId(raw.to_string()))
}

pub fn parse(line: &str) -> Result<Command, ParseError> {
	let words: Vec<&str> = line.split_whitespace().collect();
	let Some((&name, args)) = words.split_first() else {
		return Err(ParseError::Usage("help"));
	};

	let command = match (name, args) {
		("member", [id, rest @ ..]) if !rest.is_empty() => Command::Member {
			id: AccountId::from(*id),
			name: rest.join(" "),
		},
		("member", _) => return Err(ParseError::Usage("member <id> <name>")),
		("deposit", [account, amount]) => Command::Deposit {
			account: AccountId::from(*account),
			amount: parse_amount(amount)?,
		},
		("deposit", _) => return Err(ParseError::Usage("deposit <id> <amount>")),
		("pay", [account, amount]) => Command::Pay {
			account: AccountId::from(*account),
			amount: parse_amount(amount)?,
		},
		("pay", _) => return Err(ParseError::Usage("pay <id> <amount>")),
		("transfer", [from, to, amount]) => Command::Transfer {
			from: AccountId::from(*from),
			to: AccountId::from(*to),
			amount: parse_amount(amount)?,
		},
		("transfer", _) => return Err(ParseError::Usage("transfer <from> <to> <amount>")),
		("balances", []) => Command::Balances,
		("conflicts", []) => Command::Conflicts,
		("ack", [id]) => Command::Acknowledge(parse_id(id)?),
		("ack", _) => return Err(ParseError::Usage("ack <op-id>")),
		("retry", [id]) => Command::Retry(parse_id(id)?),
		("retry", _) => return Err(ParseError::Usage("retry <op-id>")),
		("sync", []) => Command::Sync,
		("online", []) => Command::Online,
		("offline", []) => Command::Offline,
		("compact", []) => Command::Compact,
		("status", []) => Command::Status,
		("help", _) => Command::Help,
		("quit" | "exit", _) => Command::Quit,
		(other, _) => return Err(ParseError::UnknownCommand(other.to_string())),
	};
	Ok(command)
}

pub struct Console<'a> {
	pub session: &'a CashierSession,
	pub ledger: &'a Ledger,
	pub scheduler: &'a SyncScheduler,
	pub monitor: &'a ConnectivityMonitor,
	pub signals: &'a SignalSender,
}

impl Console<'_> {
	/// Reads commands until `quit` or end of input.
	pub async fn run(&self) -> std::io::Result<()> {
		let mut lines = BufReader::new(tokio::io::stdin()).lines();
		println!("{}", HELP);

		while let Some(line) = lines.next_line().await? {
			if line.trim().is_empty() {
				continue;
			}
			match parse(&line) {
				Ok(Command::Quit) => break,
				Ok(command) => self.execute(command).await,
				Err(e) => println!("{}", e),
			}
		}
		info!("Console closed");
		Ok(())
	}

	fn print_receipt(&self, receipt: &CashierReceipt) {
		println!(
			"{} {} ok, {} now {} ({} awaiting sync)",
			receipt.kind,
			receipt.operation_id,
			receipt.account,
			format_balance(receipt.balance, DECIMALS),
			receipt.pending_sync
		);
	}

	async fn execute(&self, command: Command) {
		let session = self.session;
		match command {
			Command::Member { id, name } => match session.register_member(id, name).await {
				Ok(account) => println!("registered {} ({})", account.id, account.display_name),
				Err(e) => println!("{}", e),
			},
			Command::Deposit { account, amount } => {
				match session.request_deposit(account, amount).await {
					Ok(receipt) => self.print_receipt(&receipt),
					Err(e) => println!("{}", e),
				}
			}
			Command::Pay { account, amount } => {
				match session.request_pay_tab(account, amount).await {
					Ok(receipt) => self.print_receipt(&receipt),
					Err(e) => println!("{}", e),
				}
			}
			Command::Transfer { from, to, amount } => {
				match session.request_transfer_tab(from, to, amount).await {
					Ok(receipt) => self.print_receipt(&receipt),
					Err(e) => println!("{}", e),
				}
			}
			Command::Balances => {
				let balances = session.balances();
				for account in session.accounts() {
					let balance = balances.get(&account.id).copied().unwrap_or(0);
					let state = if account.active { "" } else { " (inactive)" };
					println!(
						"{:<12} {:<20} {:>10}{}",
						account.id,
						account.display_name,
						format_balance(balance, DECIMALS),
						state
					);
				}
			}
			Command::Conflicts => {
				let conflicts = session.conflicts();
				if conflicts.is_empty() {
					println!("no open conflicts");
				}
				for notice in conflicts {
					println!("{}", notice.describe());
				}
			}
			Command::Acknowledge(id) => match session.acknowledge(&id).await {
				Ok(Some(_)) => println!("discarded {}", id),
				Ok(None) => println!("no open conflict for {}", id),
				Err(e) => println!("acknowledge failed, conflict kept: {}", e),
			},
			Command::Retry(id) => match session.retry(&id).await {
				Ok(Some(receipt)) => self.print_receipt(&receipt),
				Ok(None) => println!("no open conflict for {}", id),
				Err(e) => println!("retry failed, conflict kept: {}", e),
			},
			Command::Sync => {
				self.scheduler.trigger();
				println!("sync requested");
			}
			Command::Online => self.report(TransportSignal::Online),
			Command::Offline => self.report(TransportSignal::Offline),
			Command::Compact => match self.ledger.compact_expired().await {
				Ok(removed) => println!("compacted {} operations", removed),
				Err(e) => println!("compaction failed: {}", e),
			},
			Command::Status => {
				println!(
					"{:?}, {} operations awaiting sync, {} open conflicts",
					self.monitor.current_state(),
					session.pending_sync(),
					session.conflicts().len()
				);
				if let Some(report) = self.scheduler.latest_report() {
					println!("last sync: {:?}, {}", report.outcome, report.stats.summary());
				}
			}
			Command::Help => println!("{}", HELP),
			Command::Quit => {}
		}
	}

	fn report(&self, signal: TransportSignal) {
		if !self.signals.send(signal) {
			warn!("Connectivity monitor is not running");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_amounts() {
		assert_eq!(parse_amount("12"), Ok(1200));
		assert_eq!(parse_amount("12.5"), Ok(1250));
		assert_eq!(parse_amount("0.05"), Ok(5));
		assert!(parse_amount("1.234").is_err());
		assert!(parse_amount("-3").is_err());
		assert!(parse_amount(".5").is_err());
		assert!(parse_amount("abc").is_err());
	}

	#[test]
	fn test_parse_commands() {
		assert_eq!(
			parse("transfer anna ben 2.50"),
			Ok(Command::Transfer {
				from: "anna".into(),
				to: "ben".into(),
				amount: 250,
			})
		);
		assert_eq!(
			parse("member anna Anna Schmidt"),
			Ok(Command::Member {
				id: "anna".into(),
				name: "Anna Schmidt".to_string(),
			})
		);
		assert_eq!(
			parse("retry 0a1b:4"),
			Ok(Command::Retry(OperationId::new("0a1b", 4)))
		);
		assert_eq!(parse("deposit anna"), Err(ParseError::Usage("deposit <id> <amount>")));
		assert!(matches!(parse("ack nope"), Err(ParseError::InvalidOperationId(_))));
		assert!(matches!(parse("dance"), Err(ParseError::UnknownCommand(_))));
	}
}
