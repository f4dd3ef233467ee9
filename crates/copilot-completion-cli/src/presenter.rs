use arboard::Clipboard;
use colored::Colorize;
use copilot_completion::auth::{AuthPresenter, AUTH_TIMEOUT};
use copilot_completion::error::AuthError;
use log::warn;

/// Interactive presenter: shows the code in a box, copies it to the
/// clipboard and opens the verification page.
pub struct ConsolePresenter {
    open_browser: bool,
}

impl ConsolePresenter {
    pub fn new(open_browser: bool) -> Self {
        ConsolePresenter { open_browser }
    }

    fn copy_to_clipboard(user_code: &str) -> bool {
        match Clipboard::new().and_then(|mut clipboard| clipboard.set_text(user_code.to_string())) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not copy user code to clipboard: {e}");
                false
            }
        }
    }
}

impl AuthPresenter for ConsolePresenter {
    fn display_device_code(&self, verification_uri: &str, user_code: &str) {
        let title = "GitHub Device Authorization";
        let visit = format!("Visit:      {verification_uri}");
        let code = format!("Enter code: {user_code}");
        let width = [title, visit.as_str(), code.as_str()]
            .iter()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or_default()
            + 2;
        let rule = "─".repeat(width);
        let pad = |text: &str| format!("{text:<w$}", w = width - 2);

        println!();
        println!("┌{rule}┐");
        println!("│ {} │", pad(title).bold());
        println!("├{rule}┤");
        println!("│ {} │", pad(&visit));
        println!("│ {} │", pad(&code).cyan());
        println!("└{rule}┘");

        if !self.open_browser {
            println!();
            return;
        }

        if Self::copy_to_clipboard(user_code) {
            println!("{}", "The code has been copied to your clipboard.".dimmed());
        }
        match webbrowser::open(verification_uri) {
            Ok(()) => println!("{}", "Opened the verification page in your browser.".dimmed()),
            Err(e) => warn!("Could not open browser: {e}"),
        }
        println!();
    }

    fn notify_timeout(&self) {
        let message = AuthError::Timeout(AUTH_TIMEOUT).to_string();
        eprintln!("{}", message.red());
    }
}
