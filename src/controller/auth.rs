//! 登录、注册与退出。

use log::info;

use crate::app::RequestContext;
use crate::exception::Exception;
use crate::util::escape_html;
use crate::validation::{FormValidator, Rule, ValidationValue};

use super::{Controller, ControllerBase, Step};

pub const LOGIN_TEMPLATE: &str = "auth/login.html";
pub const REGISTER_TEMPLATE: &str = "auth/register.html";

const INCORRECT_DETAILS: &str = "The details you provided are incorrect.";
const ACCOUNT_EXISTS: &str = "An account already exists with that email.";
const RETURN_TO_INDEX: &str = "Return to Index";

pub struct AuthController {
    base: ControllerBase,
}

impl Controller for AuthController {
    fn create(ctx: &mut RequestContext<'_>) -> Result<Self, Exception> {
        Ok(Self {
            base: ControllerBase::new(ctx.route()),
        })
    }

    fn base(&mut self) -> &mut ControllerBase {
        &mut self.base
    }

    /// 已登录用户只能访问 `logout`；没有模块时显示登录页
    fn before(&mut self, ctx: &mut RequestContext<'_>) -> Step {
        let module = ctx.route().module().map(str::to_string);
        if ctx.user().is_logged_in() && module.as_deref() != Some("logout") {
            return self.base.error_page(ctx, "Denied", "Permission denied", None);
        }
        match module {
            Some(_) => Ok(None),
            None => self.login(ctx),
        }
    }
}

impl AuthController {
    pub fn login(&mut self, ctx: &mut RequestContext<'_>) -> Step {
        self.base.set_template(ctx, LOGIN_TEMPLATE)?;
        self.base.set_title("Login");
        self.base.set("FORM_ACTION", ctx.app().link("login"));
        if !ctx.request().submitted() {
            return Ok(None);
        }

        let email = ctx.request().input_or("email", "").trim().to_string();
        let password = ctx.request().input_or("password", "");
        self.base.set("ATTEMPTED_EMAIL", escape_html(&email));

        let mut form = FormValidator::new([(
            "Email",
            ValidationValue::new(&email, vec![Rule::IsEmail, Rule::Required]),
        )]);
        if !form.validate()? {
            return self.base.error_display(ctx, form.errors());
        }

        let mut verified = None;
        {
            let users = ctx.app().users();
            if let Some(user) = users.find_by_email(&email)? {
                if users.verify_password(&user, &password)? {
                    verified = Some(user);
                }
            }
        }
        match verified {
            Some(user) => {
                info!("[ID{}]用户{}登录", ctx.id(), user.id());
                ctx.log_in(user)?;
                let index = ctx.app().link("");
                self.base.success_page(
                    ctx,
                    "Success",
                    "You have now been logged in!",
                    Some((index.as_str(), RETURN_TO_INDEX)),
                )
            }
            None => self.base.error_display(ctx, &[INCORRECT_DETAILS]),
        }
    }

    pub fn register(&mut self, ctx: &mut RequestContext<'_>) -> Step {
        self.base.set_template(ctx, REGISTER_TEMPLATE)?;
        self.base.set_title("Register");
        self.base.set("FORM_ACTION", ctx.app().link("register"));
        if !ctx.request().submitted() {
            return Ok(None);
        }

        let email = ctx.request().input_or("email", "").trim().to_string();
        let password = ctx.request().input_or("password", "");
        let verify = ctx.request().input_or("verify_password", "");
        self.base.set("ATTEMPTED_EMAIL", escape_html(&email));

        let mut form = FormValidator::new([
            (
                "Email",
                ValidationValue::new(&email, vec![Rule::Required, Rule::IsEmail]),
            ),
            (
                "Password",
                ValidationValue::password(&password, vec![Rule::MustMatchPassword(verify)]),
            ),
        ]);
        if !form.validate()? {
            return self.base.error_display(ctx, form.errors());
        }

        let mut created = None;
        {
            let mut users = ctx.app().users();
            if users.find_by_email(&email)?.is_none() {
                created = Some(users.create(&email, &password)?);
            }
        }
        match created {
            Some(user) => {
                info!("[ID{}]新用户{}注册", ctx.id(), user.id());
                let login = ctx.app().link("login");
                self.base.success_page(
                    ctx,
                    "Success",
                    "Your account has been created you can now log in.",
                    Some((login.as_str(), "Log In")),
                )
            }
            None => self.base.error_display(ctx, &[ACCOUNT_EXISTS]),
        }
    }

    pub fn logout(&mut self, ctx: &mut RequestContext<'_>) -> Step {
        ctx.log_out()?;
        let index = ctx.app().link("");
        self.base.success_page(
            ctx,
            "Logged Out",
            "You have been logged out successfully.",
            Some((index.as_str(), RETURN_TO_INDEX)),
        )
    }
}
