use crate::app::RequestContext;
use crate::exception::Exception;

use super::{Controller, ControllerBase};

pub const WELCOME_MESSAGE: &str = "Welcome to the index page.";

/// 入口根目录对应的控制器
pub struct IndexController {
    base: ControllerBase,
}

impl Controller for IndexController {
    fn create(ctx: &mut RequestContext<'_>) -> Result<Self, Exception> {
        let mut base = ControllerBase::new(ctx.route());
        base.set_template(ctx, "index.html")?;
        base.set("WELCOME_MESSAGE", WELCOME_MESSAGE);
        Ok(Self { base })
    }

    fn base(&mut self) -> &mut ControllerBase {
        &mut self.base
    }
}
