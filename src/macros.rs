//! The `interface!` macro: expands a declarative interface body into a
//! marker type plus `const` [`Method`](crate::interface::Method)/
//! [`Signal`](crate::interface::Signal)/[`Property`](crate::interface::Property)
//! items and an [`Interface`](crate::interface::Interface) impl.
//!
//! ```
//! simppl::interface! {
//!     pub interface Calculator = "org.example.Calculator" {
//!         method ADD = "add"(a: i32, b: f64) -> f64;
//!         method RESET = "reset"() -> oneway;
//!         signal OVERFLOWED = "overflowed"(at: i32);
//!         property VALUE = "value": f64 [ReadOnly, OnChange];
//!     }
//! }
//! ```

/// Declare a bus interface: a dotted name plus an ordered list of methods,
/// signals and properties.
///
/// Each member gives both a Rust const identifier (conventionally
/// `SCREAMING_CASE`) and the bus-visible member name as a string literal,
/// since the two don't have to (and often don't) match case conventions.
/// Method/signal parameter lists are built into a tuple `Encode`/`Decode`
/// type; an empty parameter list becomes `()`. A `-> oneway` method expects
/// no reply.
#[macro_export]
macro_rules! interface {
    (
        $(#[$meta:meta])*
        $vis:vis interface $name:ident = $iface:literal {
            $($body:tt)*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name;

        impl $name {
            $crate::__interface_consts! { $($body)* }
        }

        impl $crate::interface::Interface for $name {
            const NAME: &'static str = $iface;

            const MEMBERS: &'static [$crate::interface::Member] =
                $crate::__interface_list!($name; []; $($body)*);
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __interface_consts {
    () => {};

    (
        method $CONST:ident = $member:literal ( $($pname:ident : $pty:ty),* $(,)? ) -> oneway ;
        $($rest:tt)*
    ) => {
        pub const $CONST: $crate::interface::Method<($($pty,)*), ()> =
            $crate::interface::Method::new_oneway($member);
        $crate::__interface_consts! { $($rest)* }
    };

    (
        method $CONST:ident = $member:literal ( $($pname:ident : $pty:ty),* $(,)? ) -> $out:ty ;
        $($rest:tt)*
    ) => {
        pub const $CONST: $crate::interface::Method<($($pty,)*), $out> =
            $crate::interface::Method::new($member);
        $crate::__interface_consts! { $($rest)* }
    };

    (
        signal $CONST:ident = $member:literal ( $($pname:ident : $pty:ty),* $(,)? ) ;
        $($rest:tt)*
    ) => {
        pub const $CONST: $crate::interface::Signal<($($pty,)*)> =
            $crate::interface::Signal::new($member);
        $crate::__interface_consts! { $($rest)* }
    };

    (
        property $CONST:ident = $member:literal : $ty:ty [ $access:ident , $notify:ident ] ;
        $($rest:tt)*
    ) => {
        pub const $CONST: $crate::interface::Property<$ty> = $crate::interface::Property::new(
            $member,
            $crate::properties::Access::$access,
            $crate::properties::NotifyPolicy::$notify,
        );
        $crate::__interface_consts! { $($rest)* }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __interface_list {
    ($iface:ident; [$($acc:expr),*];) => {
        &[$($acc),*] as &[$crate::interface::Member]
    };

    (
        $iface:ident; [$($acc:expr),*];
        method $CONST:ident = $member:literal ( $($pname:ident : $pty:ty),* $(,)? ) -> oneway ;
        $($rest:tt)*
    ) => {
        $crate::__interface_list!(
            $iface; [$($acc,)* $crate::interface::Member::Method($iface::$CONST.info)]; $($rest)*
        )
    };

    (
        $iface:ident; [$($acc:expr),*];
        method $CONST:ident = $member:literal ( $($pname:ident : $pty:ty),* $(,)? ) -> $out:ty ;
        $($rest:tt)*
    ) => {
        $crate::__interface_list!(
            $iface; [$($acc,)* $crate::interface::Member::Method($iface::$CONST.info)]; $($rest)*
        )
    };

    (
        $iface:ident; [$($acc:expr),*];
        signal $CONST:ident = $member:literal ( $($pname:ident : $pty:ty),* $(,)? ) ;
        $($rest:tt)*
    ) => {
        $crate::__interface_list!(
            $iface; [$($acc,)* $crate::interface::Member::Signal($iface::$CONST.info)]; $($rest)*
        )
    };

    (
        $iface:ident; [$($acc:expr),*];
        property $CONST:ident = $member:literal : $ty:ty [ $access:ident , $notify:ident ] ;
        $($rest:tt)*
    ) => {
        $crate::__interface_list!(
            $iface; [$($acc,)* $crate::interface::Member::Property($iface::$CONST.info)]; $($rest)*
        )
    };
}

#[cfg(test)]
mod tests {
    use crate::interface::Interface;

    crate::interface! {
        pub interface Calculator = "org.example.Calculator" {
            method ADD = "add"(a: i32, b: f64) -> f64;
            method RESET = "reset"() -> oneway;
            signal OVERFLOWED = "overflowed"(at: i32);
            property VALUE = "value": f64 [ReadOnly, OnChange];
        }
    }

    #[test]
    fn expands_members_in_declaration_order() {
        assert_eq!(Calculator::NAME, "org.example.Calculator");
        assert_eq!(Calculator::MEMBERS.len(), 4);
        assert_eq!(Calculator::ADD.info.name, "add");
        assert!(!Calculator::ADD.info.oneway);
        assert_eq!(Calculator::RESET.info.name, "reset");
        assert!(Calculator::RESET.info.oneway);
        assert_eq!(Calculator::OVERFLOWED.info.name, "overflowed");
        assert_eq!(Calculator::VALUE.info.name, "value");
    }
}
