use super::*;

#[test]
fn parse_donation_item_reads_id_and_quantity() {
    assert_eq!(parse_donation_item("7:1.5"), Ok(DonationItem { food_log: 7, quantity: 1.5 }));
    assert_eq!(parse_donation_item(" 3 : 2 "), Ok(DonationItem { food_log: 3, quantity: 2.0 }));
}

#[test]
fn parse_donation_item_rejects_malformed_input() {
    assert!(parse_donation_item("7").is_err());
    assert!(parse_donation_item("x:1").is_err());
    assert!(parse_donation_item("7:lots").is_err());
}

#[test]
fn cli_parses_repeated_donation_items() {
    let cli = Cli::try_parse_from([
        "foodshare",
        "--session-file",
        "/tmp/s.json",
        "donations",
        "create",
        "--center",
        "2",
        "--item",
        "7:1.5",
        "--item",
        "8:2",
    ])
    .unwrap();
    match cli.command {
        Command::Donations(DonationCommand { command: DonationSubcommand::Create { center, items } }) => {
            assert_eq!(center, 2);
            assert_eq!(items.len(), 2);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn describe_api_appends_backend_detail() {
    let err = ApiError::from_status(401, "{\"detail\":\"Invalid token.\"}".to_owned());
    assert_eq!(describe_api(&err), "unauthorized: status 401: Invalid token.");
    let err = ApiError::Transport("refused".to_owned());
    assert_eq!(describe_api(&err), "request failed: refused");
}
