//! Message routing for managed window procedures.

use super::kind::WindowKind;

/// Identifier of the host UI refresh timer.
pub const UI_TIMER_ID: usize = 12346;

/// UI timer interval of child windows in milliseconds.
pub const CHILD_TIMER_INTERVAL: u32 = 15;

/// Menu command of the injected version item.
pub const VERSION_COMMAND_ID: usize = 0x1337;

const WM_CREATE: u32 = 0x0001;
const WM_DESTROY: u32 = 0x0002;
const WM_SIZE: u32 = 0x0005;
const WM_PAINT: u32 = 0x000F;
const WM_ERASEBKGND: u32 = 0x0014;
const WM_DISPLAYCHANGE: u32 = 0x007E;
const WM_NCHITTEST: u32 = 0x0084;
const WM_COMMAND: u32 = 0x0111;
const WM_TIMER: u32 = 0x0113;
const WM_MOUSEMOVE: u32 = 0x0200;
const WM_LBUTTONDOWN: u32 = 0x0201;
const WM_LBUTTONDBLCLK: u32 = 0x0203;
const WM_RBUTTONDOWN: u32 = 0x0204;
const WM_RBUTTONDBLCLK: u32 = 0x0206;
const WM_MOUSEWHEEL: u32 = 0x020A;
const WM_SIZING: u32 = 0x0214;

/// Window message classes the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Create,
    Destroy,
    Sizing,
    Size,
    Paint,
    UiTimer,
    EraseBackground,
    DisplayChange,

    /// Mouse button down, up or double click.
    Button { left: bool },
    Move,
    Wheel,
    HitTest,
    VersionCommand,
    Other,
}

impl MessageKind {
    pub const fn classify(msg: u32, wparam: usize) -> Self {
        match msg {
            WM_CREATE => Self::Create,
            WM_DESTROY => Self::Destroy,
            WM_SIZING => Self::Sizing,
            WM_SIZE => Self::Size,
            WM_PAINT => Self::Paint,
            WM_TIMER if wparam == UI_TIMER_ID => Self::UiTimer,
            WM_ERASEBKGND => Self::EraseBackground,
            WM_DISPLAYCHANGE => Self::DisplayChange,
            WM_LBUTTONDOWN..=WM_LBUTTONDBLCLK => Self::Button { left: true },
            WM_RBUTTONDOWN..=WM_RBUTTONDBLCLK => Self::Button { left: false },
            WM_MOUSEMOVE => Self::Move,
            WM_MOUSEWHEEL => Self::Wheel,
            WM_NCHITTEST => Self::HitTest,
            WM_COMMAND if wparam & 0xFFFF == VERSION_COMMAND_ID => Self::VersionCommand,
            _ => Self::Other,
        }
    }
}

/// Handling chosen for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Start managing the window.
    Create,

    /// Stop managing the window. The main window persists its size first.
    Destroy,

    /// Clamp the interactive resize rect.
    Sizing,

    /// Resize buffers and lay out children.
    Size,

    /// Forward, then render.
    Paint,

    /// Forward, then render. Children only render.
    UiTimer,

    /// Forward with the scratch device context.
    EraseBackground,

    /// Repaint everything into the scratch device context.
    DisplayChange,

    /// Map the point to logical space and forward, rendering afterwards if `render`.
    Pointer { render: bool },

    /// Map the point to logical space and forward, refreshing while dragging.
    Move,

    /// Map the screen point through logical space and forward, then render.
    Wheel,

    /// Classify the point as grip, caption or client.
    HitTest,

    /// Show project information.
    VersionCommand,

    /// Pass through untouched.
    Forward,
}

/// Handling of `msg` for windows of `kind`.
pub const fn route(kind: WindowKind, msg: MessageKind) -> Route {
    match (kind, msg) {
        (_, MessageKind::Create) => Route::Create,
        (_, MessageKind::Destroy) => Route::Destroy,
        (_, MessageKind::Paint) => Route::Paint,
        (_, MessageKind::UiTimer) => Route::UiTimer,
        (_, MessageKind::EraseBackground) => Route::EraseBackground,
        (_, MessageKind::Button { left }) => Route::Pointer { render: left },
        (_, MessageKind::Move) => Route::Move,

        (WindowKind::Main, MessageKind::Sizing) => Route::Sizing,
        (WindowKind::Main, MessageKind::Size) => Route::Size,
        (WindowKind::Main, MessageKind::DisplayChange) => Route::DisplayChange,
        (WindowKind::Main, MessageKind::Wheel) => Route::Wheel,
        (WindowKind::Main, MessageKind::HitTest) => Route::HitTest,
        (WindowKind::Main, MessageKind::VersionCommand) => Route::VersionCommand,

        (
            WindowKind::AppVolume | WindowKind::Compressor | WindowKind::Denoiser,
            MessageKind::Sizing
            | MessageKind::Size
            | MessageKind::DisplayChange
            | MessageKind::Wheel
            | MessageKind::HitTest
            | MessageKind::VersionCommand,
        ) => Route::Forward,

        (_, MessageKind::Other) => Route::Forward,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_messages() {
        assert_eq!(MessageKind::classify(0x0001, 0), MessageKind::Create);
        assert_eq!(MessageKind::classify(0x0113, UI_TIMER_ID), MessageKind::UiTimer);
        assert_eq!(MessageKind::classify(0x0113, 1), MessageKind::Other);
        assert_eq!(
            MessageKind::classify(0x0202, 0),
            MessageKind::Button { left: true }
        );
        assert_eq!(
            MessageKind::classify(0x0205, 0),
            MessageKind::Button { left: false }
        );
        assert_eq!(
            MessageKind::classify(0x0111, 0x0001_1337),
            MessageKind::VersionCommand
        );
        assert_eq!(MessageKind::classify(0x0111, 0x1F9), MessageKind::Other);
        assert_eq!(MessageKind::classify(0x0214, 8), MessageKind::Sizing);
    }

    #[test]
    fn main_routes() {
        let main = WindowKind::Main;
        assert_eq!(route(main, MessageKind::Sizing), Route::Sizing);
        assert_eq!(route(main, MessageKind::Wheel), Route::Wheel);
        assert_eq!(route(main, MessageKind::HitTest), Route::HitTest);
        assert_eq!(
            route(main, MessageKind::Button { left: false }),
            Route::Pointer { render: false }
        );
        assert_eq!(route(main, MessageKind::Other), Route::Forward);
    }

    #[test]
    fn children_forward_layout_messages() {
        for kind in WindowKind::CHILDREN {
            for msg in [
                MessageKind::Sizing,
                MessageKind::Size,
                MessageKind::DisplayChange,
                MessageKind::Wheel,
                MessageKind::HitTest,
                MessageKind::VersionCommand,
                MessageKind::Other,
            ] {
                assert_eq!(route(kind, msg), Route::Forward, "{kind:?} {msg:?}");
            }

            assert_eq!(route(kind, MessageKind::Create), Route::Create);
            assert_eq!(route(kind, MessageKind::UiTimer), Route::UiTimer);
            assert_eq!(
                route(kind, MessageKind::Button { left: true }),
                Route::Pointer { render: true }
            );
        }
    }
}
