use gtk4::CssProvider;

const RUNTIME_CSS: &str = "
window.snapask-overlay {
  background: transparent;
}
.snapask-transcript {
  padding: 8px;
}
.snapask-thumbnail-strip {
  padding: 4px;
}
.snapask-thumbnail {
  padding: 2px;
  border-radius: 6px;
}
.snapask-thumbnail:hover {
  box-shadow: inset 0 0 0 2px rgba(224, 64, 64, 0.9);
}
.snapask-input-row {
  padding: 6px;
}
";

pub(super) fn install_runtime_css() {
    let provider = CssProvider::new();
    provider.load_from_data(RUNTIME_CSS);
    if let Some(display) = gtk4::gdk::Display::default() {
        gtk4::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
        );
    }
}
